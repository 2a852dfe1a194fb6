//! Error types shared by every dispatch component.

use crate::core::ChannelType;
use thiserror::Error;

/// Crate-wide result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Typed dispatch errors.
///
/// Configuration, lookup, lifecycle and cancellation errors are terminal.
/// Transport errors may be retried by the plugin that raised them, see
/// [`DispatchError::is_retryable`].
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// A config map failed schema or semantic validation.
    #[error("invalid configuration for field `{field}`: {reason}")]
    Config { field: String, reason: String },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("no plugin registered for channel type `{0}`")]
    PluginNotFound(ChannelType),

    #[error("a plugin for channel type `{0}` is already registered")]
    PluginAlreadyRegistered(ChannelType),

    #[error("a channel named `{0}` already exists")]
    DuplicateName(String),

    /// Network-level failure (connection refused, timeout, TLS, ...).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The remote answered but the body could not be understood.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("plugin `{plugin}` failed to {operation}: {reason}")]
    Lifecycle {
        plugin: String,
        operation: &'static str,
        reason: String,
    },

    #[error("health monitor is already running")]
    MonitorAlreadyRunning,

    #[error("health monitor is not running")]
    MonitorNotRunning,

    /// Failure reported by the channel persistence service.
    #[error("channel store error: {0}")]
    Store(String),
}

impl DispatchError {
    #[must_use]
    pub fn config(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    #[must_use]
    pub fn lifecycle(
        plugin: impl Into<String>,
        operation: &'static str,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Lifecycle {
            plugin: plugin.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Whether a plugin may try the same delivery again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::HttpStatus { .. } | Self::Authentication(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChannelNotFound(_) | Self::PluginNotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        if err.is_decode() {
            return Self::MalformedResponse(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}
