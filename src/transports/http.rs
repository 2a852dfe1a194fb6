//! Shared HTTP plumbing for the webhook-style transports.

use crate::core::{ChannelConfig, Settings};
use crate::error::{DispatchError, Result};
use crate::schema::settings;
use reqwest::{Client, RequestBuilder, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = concat!("alertrelay/", env!("CARGO_PKG_VERSION"));

/// An HTTP client plus the started/stopped state of the owning plugin.
///
/// The client is built by [`configure`](Self::configure), or on first use
/// with default options.
pub struct HttpSender {
    plugin: &'static str,
    client: RwLock<Option<Client>>,
    started: AtomicBool,
}

impl HttpSender {
    pub fn new(plugin: &'static str) -> Self {
        Self {
            plugin,
            client: RwLock::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Rebuilds the client from plugin-wide options (`user_agent`,
    /// `connect_timeout`).
    pub fn configure(&self, options: &Settings) -> Result<()> {
        let user_agent = settings::str(options, "user_agent").unwrap_or(DEFAULT_USER_AGENT);
        let mut builder = Client::builder().user_agent(user_agent);
        if let Some(secs) = settings::u64(options, "connect_timeout") {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| DispatchError::lifecycle(self.plugin, "initialize", e))?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
        Ok(())
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(DispatchError::lifecycle(self.plugin, "send", "plugin is not started"))
        }
    }

    pub fn client(&self) -> Result<Client> {
        if let Some(client) = self.client.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(client.clone());
        }
        let mut slot = self.client.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| DispatchError::lifecycle(self.plugin, "initialize", e))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Sends a request, racing it against `cancel`. Non-2xx statuses become
    /// [`DispatchError::HttpStatus`].
    pub async fn execute(&self, request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = match self.read_body(response, cancel).await {
                Err(DispatchError::Cancelled) => return Err(DispatchError::Cancelled),
                other => other.unwrap_or_default(),
            };
            debug!(plugin = self.plugin, %status, "Remote rejected request");
            return Err(DispatchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Reads the whole body, still honouring `cancel`.
    pub async fn read_body(&self, response: Response, cancel: &CancellationToken) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            body = response.text() => body.map_err(|e| DispatchError::MalformedResponse(e.to_string())),
        }
    }

    /// Reachability probe: any HTTP answer counts, only network failures
    /// are reported.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<()> {
        self.client()?
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map(|_| ())
            .map_err(DispatchError::transport)
    }
}

/// Per-request timeout: the `timeout` setting, else the channel timeout.
pub fn request_timeout(config: &ChannelConfig) -> Duration {
    settings::u64(&config.settings, "timeout")
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.timeout())
}

/// Rejects anything that is not an absolute http(s) URL with a host.
pub fn check_http_url(field: &str, raw: &str) -> Result<()> {
    let url = reqwest::Url::parse(raw).map_err(|e| DispatchError::config(field, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DispatchError::config(
            field,
            format!("unsupported URL scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DispatchError::config(field, "URL has no host"));
    }
    Ok(())
}
