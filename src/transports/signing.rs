//! HMAC-SHA256 signatures for webhook bodies and chat-bot URLs.

use crate::error::{DispatchError, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

fn mac(secret: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DispatchError::config("secret", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `sha256=<hex(hmac_sha256(secret, body))>`
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String> {
    Ok(format!("sha256={}", hex::encode(mac(secret, body)?)))
}

/// `base64(hmac_sha256(secret, "<timestamp>\n<secret>"))`
pub fn sign_timestamp(secret: &str, timestamp_ms: i64) -> Result<String> {
    let string_to_sign = format!("{}\n{}", timestamp_ms, secret);
    let digest = mac(secret, string_to_sign.as_bytes())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

/// Appends `timestamp` and `sign` query parameters to a chat-bot webhook URL.
pub fn signed_url(webhook_url: &str, secret: &str, timestamp_ms: i64) -> Result<Url> {
    let mut url = Url::parse(webhook_url).map_err(|e| DispatchError::config("webhook_url", e))?;
    let sign = sign_timestamp(secret, timestamp_ms)?;
    url.query_pairs_mut()
        .append_pair("timestamp", &timestamp_ms.to_string())
        .append_pair("sign", &sign);
    Ok(url)
}
