//! AlertRelay - a multi-channel alert dispatch engine
//!
//! Channels are configured destinations (webhooks, chat-bot webhooks, Slack,
//! email) served by pluggable transports. [`manager::ChannelManager`] is the
//! entry point: it validates channel settings, dispatches messages one by one
//! or as an isolated concurrent broadcast, probes channel health and keeps
//! delivery statistics.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod filter;
pub mod formatting;
pub mod health;
pub mod manager;
pub mod plugin;
pub mod ratelimit;
pub mod schema;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod transports;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{DispatchError, Result};
pub use manager::ChannelManager;
