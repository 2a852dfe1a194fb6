//! DingTalk custom robot transport.

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings};
use crate::error::Result;
use crate::formatting::{MarkdownFlavor, MarkdownFormatter, PlainTextFormatter, TextFormatter};
use crate::plugin::{Capability, TransportPlugin};
use crate::schema::{settings, validate_by_schema};
use crate::transports::chatbot::{self, delivery_properties};
use crate::transports::http::{check_http_url, request_timeout, HttpSender};
use crate::transports::signing::signed_url;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const PLATFORM: &str = "dingtalk";

/// Builds the robot payload for `msg_type` `text` or `markdown`.
pub fn build_payload(settings: &Settings, message: &Message) -> Value {
    let at_mobiles = settings::strings(settings, "at_mobiles");
    let at_user_ids = settings::strings(settings, "at_user_ids");
    let is_at_all = settings::bool(settings, "is_at_all").unwrap_or(false);

    // Mentions only fire when the handle also appears in the text.
    let mentions: Vec<String> = at_mobiles
        .iter()
        .chain(at_user_ids.iter())
        .map(|handle| format!("@{}", handle))
        .collect();

    let at = json!({
        "atMobiles": at_mobiles,
        "atUserIds": at_user_ids,
        "isAtAll": is_at_all,
    });

    match settings::str(settings, "msg_type") {
        Some("markdown") => {
            let mut text = MarkdownFormatter {
                flavor: MarkdownFlavor::DingTalk,
            }
            .format(message);
            if !mentions.is_empty() {
                text.push_str("\n\n");
                text.push_str(&mentions.join(" "));
            }
            json!({
                "msgtype": "markdown",
                "markdown": { "title": message.title, "text": text },
                "at": at,
            })
        }
        _ => {
            let mut content = PlainTextFormatter.format(message);
            if !mentions.is_empty() {
                content.push('\n');
                content.push_str(&mentions.join(" "));
            }
            json!({
                "msgtype": "text",
                "text": { "content": content },
                "at": at,
            })
        }
    }
}

pub struct DingTalkPlugin {
    http: HttpSender,
}

impl Default for DingTalkPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DingTalkPlugin {
    pub fn new() -> Self {
        Self {
            http: HttpSender::new(PLATFORM),
        }
    }

    /// The webhook URL, signed with a fresh timestamp when a secret is set.
    fn target_url(settings: &Settings) -> Result<String> {
        let webhook_url = settings::str(settings, "webhook_url").unwrap_or_default();
        match settings::str(settings, "secret") {
            Some(secret) => {
                Ok(signed_url(webhook_url, secret, Utc::now().timestamp_millis())?.to_string())
            }
            None => Ok(webhook_url.to_string()),
        }
    }
}

#[async_trait]
impl TransportPlugin for DingTalkPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::DingTalk
    }

    fn name(&self) -> &str {
        "DingTalk"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "DingTalk group robot with signed webhooks and @mentions"
    }

    fn config_schema(&self) -> Value {
        let mut properties = json!({
            "webhook_url": { "type": "string", "pattern": "^https?://", "description": "Robot webhook URL including access_token" },
            "secret": { "type": "string", "minLength": 1, "description": "Signing secret (SEC...)" },
            "msg_type": { "type": "string", "enum": ["text", "markdown"], "default": "text" },
            "at_mobiles": { "type": "array", "items": { "type": "string", "pattern": "^\\+?[0-9-]{5,20}$" } },
            "at_user_ids": { "type": "array", "items": { "type": "string", "minLength": 1 } },
            "is_at_all": { "type": "boolean", "default": false }
        });
        if let (Some(target), Value::Object(shared)) = (properties.as_object_mut(), delivery_properties()) {
            target.extend(shared);
        }
        json!({
            "type": "object",
            "properties": properties,
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

    #[instrument(skip_all, fields(message_id = %message.id))]
    async fn send_message(
        &self,
        config: &ChannelConfig,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        self.http.ensure_started()?;
        self.validate_config(&config.settings)?;

        let payload = build_payload(&config.settings, message);
        let settings = &config.settings;
        chatbot::deliver(
            &self.http,
            PLATFORM,
            config,
            message,
            &payload,
            || Self::target_url(settings),
            cancel,
        )
        .await
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::TextMessage,
            Capability::MarkdownMessage,
            Capability::HealthCheck,
            Capability::Retry,
        ]
    }
}
