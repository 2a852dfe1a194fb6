//! Shared delivery path for chat-bot webhooks that answer with
//! `{"errcode": 0, "errmsg": "ok"}`.

use crate::core::{ChannelConfig, Message, SendResult};
use crate::error::{DispatchError, Result};
use crate::transports::http::{request_timeout, HttpSender};
use crate::transports::retry::{with_retry, Attempted, RetrySchedule};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct BotReply {
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: String,
}

/// Checks a bot reply body. Anything but `errcode == 0` is a rejection.
pub fn check_reply(platform: &str, body: &str) -> Result<()> {
    let reply: BotReply = serde_json::from_str(body).map_err(|e| {
        DispatchError::MalformedResponse(format!("{} reply is not JSON: {}", platform, e))
    })?;
    match reply.errcode {
        Some(0) => Ok(()),
        Some(code) => Err(DispatchError::Transport(format!(
            "{} rejected the message: errcode {} ({})",
            platform, code, reply.errmsg
        ))),
        None => Err(DispatchError::MalformedResponse(format!(
            "{} reply has no errcode",
            platform
        ))),
    }
}

/// Common schema fragment for the retry and timeout knobs.
pub fn delivery_properties() -> Value {
    json!({
        "timeout": { "type": "integer", "minimum": 1, "maximum": 300, "default": 30 },
        "retry_count": { "type": "integer", "minimum": 0, "maximum": 5, "default": 3 },
        "retry_interval": { "type": "integer", "minimum": 1, "maximum": 300, "default": 5 }
    })
}

/// Posts `payload` with the channel's retry schedule. `url_for` is called per
/// attempt so signed URLs carry a fresh timestamp.
pub async fn deliver<F>(
    http: &HttpSender,
    platform: &'static str,
    config: &ChannelConfig,
    message: &Message,
    payload: &Value,
    url_for: F,
    cancel: &CancellationToken,
) -> Result<SendResult>
where
    F: Fn() -> Result<String>,
{
    let url_for = &url_for;
    let started = Instant::now();
    let outcome = with_retry(RetrySchedule::from_config(config), cancel, move |_| async move {
        let request = http
            .client()?
            .post(url_for()?)
            .timeout(request_timeout(config))
            .json(payload);
        let response = http.execute(request, cancel).await?;
        let body = http.read_body(response, cancel).await?;
        check_reply(platform, &body)
    })
    .await?;
    let latency = started.elapsed();

    Ok(match outcome {
        Attempted::Succeeded { retries, .. } => {
            info!(platform, retries, "Chat-bot message delivered");
            SendResult::delivered()
                .with_message_id(message.id.clone())
                .with_latency(latency)
                .with_retries(retries)
        }
        Attempted::Failed { error, retries } => {
            warn!(platform, error = %error, retries, "Chat-bot delivery failed");
            SendResult::failed(error.to_string())
                .with_latency(latency)
                .with_retries(retries)
        }
    })
}
