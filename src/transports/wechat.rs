//! WeChat Work group robot transport.

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings};
use crate::error::Result;
use crate::formatting::{MarkdownFlavor, MarkdownFormatter, PlainTextFormatter, TextFormatter};
use crate::plugin::{Capability, TransportPlugin};
use crate::schema::{settings, validate_by_schema};
use crate::transports::chatbot::{self, delivery_properties};
use crate::transports::http::{check_http_url, request_timeout, HttpSender};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const PLATFORM: &str = "wechat_work";

/// Builds the robot payload. Markdown messages cannot carry
/// `mentioned_list`, so user mentions are inlined as `<@userid>`.
pub fn build_payload(settings: &Settings, message: &Message) -> Value {
    let mentioned = settings::strings(settings, "mentioned_list");
    let mentioned_mobiles = settings::strings(settings, "mentioned_mobile_list");

    match settings::str(settings, "msg_type") {
        Some("markdown") => {
            let mut content = MarkdownFormatter {
                flavor: MarkdownFlavor::WechatWork,
            }
            .format(message);
            let inline: Vec<String> = mentioned
                .iter()
                .filter(|id| id.as_str() != "@all")
                .map(|id| format!("<@{}>", id))
                .collect();
            if !inline.is_empty() {
                content.push_str("\n\n");
                content.push_str(&inline.join(" "));
            }
            json!({
                "msgtype": "markdown",
                "markdown": { "content": content },
            })
        }
        _ => json!({
            "msgtype": "text",
            "text": {
                "content": PlainTextFormatter.format(message),
                "mentioned_list": mentioned,
                "mentioned_mobile_list": mentioned_mobiles,
            },
        }),
    }
}

pub struct WechatWorkPlugin {
    http: HttpSender,
}

impl Default for WechatWorkPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl WechatWorkPlugin {
    pub fn new() -> Self {
        Self {
            http: HttpSender::new(PLATFORM),
        }
    }
}

#[async_trait]
impl TransportPlugin for WechatWorkPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::WechatWork
    }

    fn name(&self) -> &str {
        "WeChat Work"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "WeChat Work group robot with text and markdown messages"
    }

    fn config_schema(&self) -> Value {
        let mut properties = json!({
            "webhook_url": { "type": "string", "pattern": "^https?://", "description": "Robot webhook URL including key" },
            "msg_type": { "type": "string", "enum": ["text", "markdown"], "default": "text" },
            "mentioned_list": { "type": "array", "items": { "type": "string", "minLength": 1 }, "description": "User ids, or @all" },
            "mentioned_mobile_list": { "type": "array", "items": { "type": "string", "minLength": 1 } }
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
        let url = settings::str(&config.settings, "webhook_url").unwrap_or_default();
        chatbot::deliver(
            &self.http,
            PLATFORM,
            config,
            message,
            &payload,
            || Ok(url.to_string()),
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
