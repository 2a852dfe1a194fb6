//! Generic webhook transport.
//!
//! Posts a JSON payload (fixed shape or a `{{.Field}}` template) to a
//! configured URL, optionally signing the exact body bytes with HMAC-SHA256
//! in the `X-Signature` header, and retries failed attempts at a fixed
//! interval.

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings, TestResult};
use crate::error::{DispatchError, Result};
use crate::formatting::{render_template, Escape};
use crate::plugin::{Capability, TransportPlugin};
use crate::schema::{settings, validate_by_schema};
use crate::transports::http::{check_http_url, request_timeout, HttpSender};
use crate::transports::retry::{with_retry, Attempted, RetrySchedule};
use crate::transports::signing::{sign_body, SIGNATURE_HEADER};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Builds the default payload shape.
pub fn default_payload(message: &Message) -> Value {
    json!({
        "id": message.id,
        "title": message.title,
        "content": message.content,
        "priority": message.priority,
        "type": message.message_type,
        "timestamp": message.created_at.timestamp(),
        "data": message.data,
    })
}

/// Serializes the request body for `message`.
pub fn build_body(settings: &Settings, message: &Message) -> Result<Vec<u8>> {
    match settings::str(settings, "template") {
        Some(template) => {
            let rendered = render_template(template, message, Escape::Json)?;
            serde_json::from_str::<Value>(&rendered)
                .map_err(|e| DispatchError::config("template", format!("rendered template is not valid JSON: {}", e)))?;
            Ok(rendered.into_bytes())
        }
        None => serde_json::to_vec(&default_payload(message))
            .map_err(|e| DispatchError::MalformedResponse(e.to_string())),
    }
}

pub struct WebhookPlugin {
    http: HttpSender,
}

impl Default for WebhookPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookPlugin {
    pub fn new() -> Self {
        Self {
            http: HttpSender::new("webhook"),
        }
    }

    fn method(settings: &Settings) -> Method {
        match settings::str(settings, "method") {
            Some("PUT") => Method::PUT,
            Some("PATCH") => Method::PATCH,
            _ => Method::POST,
        }
    }

    async fn attempt(
        &self,
        config: &ChannelConfig,
        url: &str,
        body: &[u8],
        signature: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u16> {
        let settings = &config.settings;
        let content_type = settings::str(settings, "content_type").unwrap_or("application/json");

        let mut request = self
            .http
            .client()?
            .request(Self::method(settings), url)
            .timeout(request_timeout(config))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_vec());

        if let Some(headers) = settings.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = self.http.execute(request, cancel).await?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl TransportPlugin for WebhookPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn name(&self) -> &str {
        "Webhook"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Delivers JSON payloads to an HTTP endpoint with optional HMAC signing"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "pattern": "^https?://", "description": "Target endpoint" },
                "method": { "type": "string", "enum": ["POST", "PUT", "PATCH"], "default": "POST" },
                "content_type": { "type": "string", "default": "application/json" },
                "headers": { "type": "object", "description": "Extra request headers" },
                "secret": { "type": "string", "description": "HMAC-SHA256 signing secret" },
                "timeout": { "type": "integer", "minimum": 1, "maximum": 300, "default": 30 },
                "retry_count": { "type": "integer", "minimum": 0, "maximum": 5, "default": 3 },
                "retry_interval": { "type": "integer", "minimum": 1, "maximum": 300, "default": 5 },
                "template": { "type": "string", "description": "JSON body template with {{.Field}} placeholders" }
            },
            "required": ["url"]
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
        let url = settings::str(&config.settings, "url").unwrap_or_default();
        self.http.probe(url, request_timeout(config)).await
    }

    fn validate_config(&self, settings: &Settings) -> Result<()> {
        validate_by_schema(settings, &self.config_schema())?;
        check_http_url("url", settings::str(settings, "url").unwrap_or_default())?;
        if let Some(headers) = settings.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if !value.is_string() {
                    return Err(DispatchError::config(
                        format!("headers.{}", name),
                        "header values must be strings",
                    ));
                }
                reqwest::header::HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| DispatchError::config(format!("headers.{}", name), e))?;
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(message_id = %message.id))]
    async fn send_message(
        &self,
        config: &ChannelConfig,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        self.http.ensure_started()?;
        self.validate_config(&config.settings)?;

        let url = settings::str(&config.settings, "url").unwrap_or_default();
        let body = build_body(&config.settings, message)?;
        let signature = match settings::str(&config.settings, "secret") {
            Some(secret) => Some(sign_body(secret, &body)?),
            None => None,
        };

        let body = body.as_slice();
        let signature = signature.as_deref();
        let started = Instant::now();
        let schedule = RetrySchedule::from_config(config);
        let outcome = with_retry(schedule, cancel, move |_| {
            self.attempt(config, url, body, signature, cancel)
        })
        .await?;
        let latency = started.elapsed();

        Ok(match outcome {
            Attempted::Succeeded { value: status, retries } => {
                info!(status, retries, "Webhook delivered");
                SendResult::delivered()
                    .with_message_id(message.id.clone())
                    .with_latency(latency)
                    .with_retries(retries)
                    .with_metadata("status_code", status)
            }
            Attempted::Failed { error, retries } => {
                warn!(error = %error, retries, "Webhook delivery failed");
                let mut result = SendResult::failed(error.to_string())
                    .with_latency(latency)
                    .with_retries(retries);
                if let DispatchError::HttpStatus { status, .. } = error {
                    result = result.with_metadata("status_code", status);
                }
                result
            }
        })
    }

    async fn test_connection(&self, config: &ChannelConfig, cancel: &CancellationToken) -> Result<TestResult> {
        let started = Instant::now();
        let mut single_shot = config.clone();
        single_shot.settings.insert("retry_count".into(), 0.into());
        let result = self.send_message(&single_shot, &Message::test_message(), cancel).await?;
        let latency = started.elapsed();
        let test = if result.success {
            TestResult::passed("webhook accepted the test message", latency)
        } else {
            TestResult::failed(result.error.unwrap_or_default(), latency)
        };
        Ok(match result.metadata.get("status_code") {
            Some(status) => test.with_detail("status_code", status.clone()),
            None => test,
        })
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::TextMessage,
            Capability::Templates,
            Capability::HealthCheck,
            Capability::Retry,
            Capability::DeliveryStatus,
        ]
    }
}
