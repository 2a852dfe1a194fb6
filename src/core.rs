//! Core domain types for alert dispatch
//!
//! This module defines the channel, message and result types that flow
//! between the manager, the transport plugins and the health monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Open, transport-specific settings (e.g. `url`, `secret`, `smtp_host`).
pub type Settings = serde_json::Map<String, Value>;

/// The transport kind a channel delivers through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Webhook,
    #[serde(rename = "dingtalk")]
    DingTalk,
    WechatWork,
    Slack,
    Email,
}

impl ChannelType {
    pub const ALL: [ChannelType; 5] = [
        ChannelType::Webhook,
        ChannelType::DingTalk,
        ChannelType::WechatWork,
        ChannelType::Slack,
        ChannelType::Email,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Webhook => "webhook",
            ChannelType::DingTalk => "dingtalk",
            ChannelType::WechatWork => "wechat_work",
            ChannelType::Slack => "slack",
            ChannelType::Email => "email",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown channel type '{}'", s))
    }
}

/// Operational status of a channel, driven entirely by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Active,
    Inactive,
    Disabled,
    Error,
    Testing,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Active => "active",
            ChannelStatus::Inactive => "inactive",
            ChannelStatus::Disabled => "disabled",
            ChannelStatus::Error => "error",
            ChannelStatus::Testing => "testing",
        };
        f.write_str(s)
    }
}

/// Retry policy used by transports that do not carry their own settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval_seconds: 5,
        }
    }
}

/// Declared send-rate policy. Enforced by the manager when `enabled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    /// Tokens added per window.
    pub rate: u32,
    /// Bucket capacity; `0` means "same as rate".
    pub burst: u32,
    pub window_seconds: u64,
    /// Maximum deliveries per UTC day.
    pub daily_cap: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 60,
            burst: 0,
            window_seconds: 60,
            daily_cap: None,
        }
    }
}

/// Comparison applied by a delivery filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Contains,
    In,
    NotIn,
    /// Priority is at least as severe as the first value.
    AtLeast,
}

/// A predicate a message must satisfy to be delivered on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFilter {
    /// `priority`, `type`, `title`, `content` or `data.<key>`.
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Title/content templates applied before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MessageTemplate {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl MessageTemplate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// Configuration embedded in every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Per-request timeout used when the transport settings do not name one.
    pub timeout_seconds: u64,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitPolicy,
    pub filters: Vec<DeliveryFilter>,
    pub template: MessageTemplate,
    /// Transport-specific keys, validated by the owning plugin's schema.
    pub settings: Settings,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 30,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            filters: Vec::new(),
            template: MessageTemplate::default(),
            settings: Settings::new(),
        }
    }
}

impl ChannelConfig {
    /// Builds a config holding only the given settings object.
    pub fn with_settings(settings: Value) -> Self {
        let settings = match settings {
            Value::Object(map) => map,
            _ => Settings::new(),
        };
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

/// A configured notification destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ChannelConfig,
    #[serde(default)]
    pub status: ChannelStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Channel {
    /// A channel can send when it is active and its config is enabled.
    pub fn can_send(&self) -> bool {
        self.status == ChannelStatus::Active && self.config.enabled
    }
}

/// Input for creating a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ChannelConfig,
    #[serde(default)]
    pub status: ChannelStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NewChannel {
    pub fn new(name: impl Into<String>, channel_type: ChannelType, config: ChannelConfig) -> Self {
        Self {
            name: name.into(),
            channel_type,
            description: String::new(),
            config,
            status: ChannelStatus::Active,
            priority: 0,
            tags: BTreeSet::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChannelUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<ChannelConfig>,
    pub status: Option<ChannelStatus>,
    pub priority: Option<i32>,
    pub tags: Option<BTreeSet<String>>,
    pub labels: Option<BTreeMap<String, String>>,
}

/// Listing filter for channels; empty fields match everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelFilter {
    pub channel_type: Option<ChannelType>,
    pub status: Option<ChannelStatus>,
    pub tag: Option<String>,
}

impl ChannelFilter {
    pub fn matches(&self, channel: &Channel) -> bool {
        self.channel_type.map_or(true, |t| t == channel.channel_type)
            && self.status.map_or(true, |s| s == channel.status)
            && self
                .tag
                .as_ref()
                .map_or(true, |tag| channel.tags.contains(tag))
    }
}

/// Message severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl MessagePriority {
    /// Higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            MessagePriority::Critical => 4,
            MessagePriority::High => 3,
            MessagePriority::Medium => 2,
            MessagePriority::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Critical => "critical",
            MessagePriority::High => "high",
            MessagePriority::Medium => "medium",
            MessagePriority::Low => "low",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessagePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(MessagePriority::Critical),
            "high" => Ok(MessagePriority::High),
            "medium" => Ok(MessagePriority::Medium),
            "low" => Ok(MessagePriority::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A notification to deliver. Never persisted by the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            priority: MessagePriority::default(),
            message_type: "alert".to_string(),
            data: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// The synthetic message used by connection tests.
    pub fn test_message() -> Self {
        Message::new(
            "Test notification",
            "This is a test message sent to verify channel connectivity.",
        )
        .with_priority(MessagePriority::Low)
        .with_type("test")
    }
}

/// How a send attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered,
    Failed,
    Cancelled,
    /// Not attempted: channel not sendable, filtered out or rate limited.
    Skipped,
}

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub channel_id: String,
    pub message_id: Option<String>,
    pub success: bool,
    pub outcome: SendOutcome,
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl SendResult {
    fn build(outcome: SendOutcome, error: Option<String>) -> Self {
        Self {
            channel_id: String::new(),
            message_id: None,
            success: outcome == SendOutcome::Delivered,
            outcome,
            error,
            latency: Duration::ZERO,
            retry_count: 0,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn delivered() -> Self {
        Self::build(SendOutcome::Delivered, None)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::build(SendOutcome::Failed, Some(error.into()))
    }

    pub fn cancelled() -> Self {
        Self::build(SendOutcome::Cancelled, Some("send cancelled".to_string()))
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::build(SendOutcome::Skipped, Some(reason.into()))
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Health classification of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
    Testing,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Unknown => "unknown",
            HealthState::Testing => "testing",
        };
        f.write_str(s)
    }
}

/// Latest health snapshot of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub channel_id: String,
    pub status: HealthState,
    pub message: String,
    pub last_check: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub response_time: Duration,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl HealthStatus {
    pub fn unknown(channel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            status: HealthState::Unknown,
            message: message.into(),
            last_check: Utc::now(),
            response_time: Duration::ZERO,
            error_count: 0,
            last_error: None,
            last_error_at: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Outcome of an interactive "test this channel" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    #[serde(default)]
    pub details: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    pub fn passed(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: false,
            ..Self::passed(message, latency)
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Serializes durations as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
