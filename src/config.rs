//! Configuration management for AlertRelay
//!
//! Settings are layered with `figment`: built-in defaults, then an optional
//! TOML file, then `ALERTRELAY_`-prefixed environment variables (`__`
//! separates nested keys, e.g. `ALERTRELAY_HEALTH__INTERVAL_SECONDS=30`),
//! then command-line flags.

use crate::cli::Cli;
use crate::core::{NewChannel, Settings};
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "alertrelay.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Default tracing filter; `RUST_LOG` takes precedence.
    pub log_level: String,
    pub dispatch: DispatchConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
    /// Channels created at startup.
    #[serde(default)]
    pub channels: Vec<NewChannel>,
}

/// Plugin lifecycle and HTTP client settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatchConfig {
    pub plugin_start_timeout_seconds: u64,
    /// User agent for HTTP-based transports.
    pub user_agent: String,
    pub connect_timeout_seconds: Option<u64>,
}

/// Configuration for the channel health monitor.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HealthConfig {
    /// Run the periodic monitor under `serve`.
    pub enabled: bool,
    pub interval_seconds: u64,
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Latency samples retained per channel type.
    pub latency_window: usize,
    /// Address of the Prometheus scrape endpoint; disabled when unset.
    pub prometheus_listen: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dispatch: DispatchConfig {
                plugin_start_timeout_seconds: 30,
                user_agent: crate::transports::http::DEFAULT_USER_AGENT.to_string(),
                connect_timeout_seconds: None,
            },
            health: HealthConfig {
                enabled: true,
                interval_seconds: 60,
                probe_timeout_seconds: 10,
            },
            metrics: MetricsConfig {
                latency_window: crate::stats::DEFAULT_LATENCY_WINDOW,
                prometheus_listen: None,
            },
            channels: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration for a parsed command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = Self::figment(path).merge(cli).extract()?;
        Ok(config)
    }

    /// Loads defaults, `path` and the environment, without CLI overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ALERTRELAY_").split("__"))
    }

    /// Options passed to every plugin's `initialize`.
    pub fn plugin_options(&self) -> Settings {
        let mut options = Settings::new();
        options.insert("user_agent".into(), Value::from(self.dispatch.user_agent.clone()));
        if let Some(secs) = self.dispatch.connect_timeout_seconds {
            options.insert("connect_timeout".into(), Value::from(secs));
        }
        options
    }

    pub fn plugin_start_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.plugin_start_timeout_seconds)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_seconds.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health.probe_timeout_seconds.max(1))
    }
}
