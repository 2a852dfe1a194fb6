//! Command-line interface.
//!
//! Global flags are merged into the figment configuration through the
//! [`Provider`] implementation below; subcommands select what the binary does.

use crate::core::{ChannelType, Message, MessagePriority};
use clap::{Args, Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Multi-channel alert dispatch engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level (e.g. `debug`, `alertrelay=trace`).
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR", global = true)]
    pub metrics_listen: Option<SocketAddr>,

    /// Health monitor interval in seconds.
    #[arg(long, value_name = "SECONDS", global = true)]
    pub health_interval: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register all transports, seed channels and run the health monitor until Ctrl-C.
    Serve,
    /// Send one message to one channel.
    Send {
        /// Channel id or name.
        #[arg(long)]
        channel: String,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Send one message to several channels concurrently.
    Broadcast {
        /// Channel ids or names; repeat the flag for each channel.
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Send a test message through a channel.
    Test {
        /// Channel id or name.
        channel: String,
    },
    /// Probe channel health. Probes every active channel when none are given.
    Health {
        channels: Vec<String>,
    },
    /// List registered transport plugins.
    Plugins {
        /// Include each plugin's settings schema.
        #[arg(long)]
        schemas: bool,
    },
    /// Validate a JSON settings file against a transport's schema.
    Validate {
        #[arg(long = "type", value_name = "TYPE")]
        channel_type: ChannelType,
        /// JSON object with the transport settings.
        file: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct MessageArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub content: String,

    #[arg(long, default_value = "medium")]
    pub priority: MessagePriority,

    #[arg(long = "type", default_value = "alert")]
    pub message_type: String,

    /// Extra data as `key=value`; repeatable.
    #[arg(long = "data", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub data: Vec<(String, String)>,
}

impl MessageArgs {
    pub fn to_message(&self) -> Message {
        self.data.iter().fold(
            Message::new(&self.title, &self.content)
                .with_priority(self.priority)
                .with_type(&self.message_type),
            |message, (key, value)| message.with_data(key, value.as_str()),
        )
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn insert_nested(dict: &mut Dict, section: &str, key: &str, value: Value) {
    let entry = dict
        .entry(section.to_string())
        .or_insert_with(|| Value::from(Dict::new()));
    if let Value::Dict(_, inner) = entry {
        inner.insert(key.to_string(), value);
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }
        if let Some(addr) = self.metrics_listen {
            insert_nested(&mut dict, "metrics", "prometheus_listen", Value::from(addr.to_string()));
        }
        if let Some(interval) = self.health_interval {
            insert_nested(&mut dict, "health", "interval_seconds", Value::from(interval));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
