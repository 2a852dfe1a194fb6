//! A transport for Slack incoming webhooks.

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings};
use crate::error::{DispatchError, Result};
use crate::formatting::{severity_color, SlackTextFormatter, TextFormatter};
use crate::plugin::{Capability, TransportPlugin};
use crate::schema::{settings, validate_by_schema};
use crate::transports::http::{check_http_url, request_timeout, HttpSender};
use crate::transports::retry::{with_retry, Attempted, RetrySchedule};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Builds the webhook payload: one attachment colored by priority.
pub fn build_payload(settings: &Settings, message: &Message) -> Value {
    let fields: Vec<Value> = message
        .data
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({ "title": key, "value": value, "short": true })
        })
        .collect();

    let mut payload = json!({
        "text": format!("[{}] {}", message.priority.as_str().to_uppercase(), message.title),
        "attachments": [{
            "color": severity_color(message.priority),
            "fallback": message.title,
            "text": SlackTextFormatter.format(message),
            "fields": fields,
            "footer": message.message_type,
            "ts": message.created_at.timestamp(),
        }],
    });
    for key in ["channel", "username", "icon_emoji"] {
        if let Some(value) = settings::str(settings, key) {
            payload[key] = json!(value);
        }
    }
    payload
}

/// A plugin for sending messages to a Slack webhook.
pub struct SlackPlugin {
    http: HttpSender,
}

impl Default for SlackPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackPlugin {
    /// Creates a new `SlackPlugin`.
    pub fn new() -> Self {
        Self {
            http: HttpSender::new("slack"),
        }
    }

    /// Posts once and checks Slack's plain-text `ok` acknowledgement.
    async fn post(
        &self,
        config: &ChannelConfig,
        webhook_url: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = self
            .http
            .client()?
            .post(webhook_url)
            .timeout(request_timeout(config))
            .json(payload);
        let response = self.http.execute(request, cancel).await?;
        let body = self.http.read_body(response, cancel).await?;
        if body.trim() == "ok" {
            Ok(())
        } else {
            Err(DispatchError::MalformedResponse(format!(
                "unexpected Slack reply: {}",
                body
            )))
        }
    }
}

#[async_trait]
impl TransportPlugin for SlackPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Slack
    }

    fn name(&self) -> &str {
        "Slack"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Slack incoming webhook with priority-colored attachments"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "webhook_url": { "type": "string", "pattern": "^https?://", "description": "Incoming webhook URL" },
                "channel": { "type": "string", "description": "Channel override, e.g. #alerts" },
                "username": { "type": "string" },
                "icon_emoji": { "type": "string", "pattern": "^:[a-z0-9_+-]+:$" },
                "timeout": { "type": "integer", "minimum": 1, "maximum": 300, "default": 30 },
                "retry_count": { "type": "integer", "minimum": 0, "maximum": 5, "default": 3 },
                "retry_interval": { "type": "integer", "minimum": 1, "maximum": 300, "default": 5 }
            },
            "required": ["webhook_url"]
        })
    }

    async fn initialize(&self, options: &Settings) -> Result<()> {
        self.http.configure(options)
    }

    async fn start(&self) -> Result<()> {
        self.http.start();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.http.stop();
        Ok(())
    }

    async fn health_check(&self, config: &ChannelConfig) -> Result<()> {
        self.validate_config(&config.settings)?;
        let url = settings::str(&config.settings, "webhook_url").unwrap_or_default();
        self.http.probe(url, request_timeout(config)).await
    }

    fn validate_config(&self, settings: &Settings) -> Result<()> {
        validate_by_schema(settings, &self.config_schema())?;
        check_http_url(
            "webhook_url",
            settings::str(settings, "webhook_url").unwrap_or_default(),
        )
    }

    /// Formats and sends a message to the configured Slack webhook.
    #[instrument(skip_all, fields(message_id = %message.id))]
    async fn send_message(
        &self,
        config: &ChannelConfig,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        self.http.ensure_started()?;
        self.validate_config(&config.settings)?;

        let webhook_url = settings::str(&config.settings, "webhook_url").unwrap_or_default();
        let payload = build_payload(&config.settings, message);
        let payload = &payload;

        let started = Instant::now();
        let outcome = with_retry(RetrySchedule::from_config(config), cancel, move |_| {
            self.post(config, webhook_url, payload, cancel)
        })
        .await?;
        let latency = started.elapsed();

        Ok(match outcome {
            Attempted::Succeeded { retries, .. } => {
                info!(retries, "Successfully sent message to Slack.");
                SendResult::delivered()
                    .with_message_id(message.id.clone())
                    .with_latency(latency)
                    .with_retries(retries)
            }
            Attempted::Failed { error, retries } => {
                error!(error = %error, retries, "Failed to send Slack notification");
                SendResult::failed(error.to_string())
                    .with_latency(latency)
                    .with_retries(retries)
            }
        })
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::TextMessage,
            Capability::MarkdownMessage,
            Capability::Attachments,
            Capability::HealthCheck,
            Capability::Retry,
        ]
    }
}
