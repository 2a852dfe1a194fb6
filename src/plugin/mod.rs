//! Transport plugin contract.
//!
//! Each notification transport (webhook, chat-bot webhooks, Slack, email)
//! implements [`TransportPlugin`]. Plugins own their wire protocol, their
//! settings schema and the classification of their failures; the manager
//! only sees uniform [`SendResult`]s and [`TestResult`]s.

pub mod registry;

pub use registry::PluginRegistry;

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings, TestResult};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A feature a plugin declares support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextMessage,
    MarkdownMessage,
    HtmlMessage,
    Attachments,
    Templates,
    HealthCheck,
    RateLimit,
    Retry,
    Batching,
    DeliveryStatus,
}

/// Static plugin descriptor used by discovery endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub name: String,
    pub version: String,
    pub description: String,
    pub config_schema: Value,
    pub capabilities: Vec<Capability>,
}

/// The capability set every notification transport implements.
#[async_trait]
pub trait TransportPlugin: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-Schema-like description of the channel settings.
    fn config_schema(&self) -> Value;

    /// Applies plugin-wide options before the plugin is started.
    async fn initialize(&self, options: &Settings) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Cheap connectivity probe. Must not deliver a message.
    async fn health_check(&self, config: &ChannelConfig) -> Result<()>;

    /// Schema validation plus transport-specific semantic checks.
    fn validate_config(&self, settings: &Settings) -> Result<()>;

    /// Delivers `message`.
    ///
    /// Configuration problems and cancellation are returned as `Err` before
    /// or instead of a delivery; transport failures that survive the plugin's
    /// retry policy come back as a failed `SendResult`.
    async fn send_message(
        &self,
        config: &ChannelConfig,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendResult>;

    /// Sends [`Message::test_message`] and reports latency and success.
    async fn test_connection(
        &self,
        config: &ChannelConfig,
        cancel: &CancellationToken,
    ) -> Result<TestResult> {
        let started = std::time::Instant::now();
        let result = self
            .send_message(config, &Message::test_message(), cancel)
            .await?;
        let latency = started.elapsed();
        let test = if result.success {
            TestResult::passed("test message delivered", latency)
        } else {
            TestResult::failed(
                result.error.unwrap_or_else(|| "test message failed".to_string()),
                latency,
            )
        };
        Ok(test.with_detail("retry_count", result.retry_count))
    }

    fn capabilities(&self) -> Vec<Capability>;

    fn supports_feature(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            channel_type: self.channel_type(),
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
            config_schema: self.config_schema(),
            capabilities: self.capabilities(),
        }
    }
}
