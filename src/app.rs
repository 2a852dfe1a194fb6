//! Application wiring, decoupled from the entry point.

use crate::config::Config;
use crate::core::{Channel, ChannelFilter, NewChannel};
use crate::error::DispatchError;
use crate::manager::ChannelManager;
use crate::plugin::TransportPlugin;
use crate::store::{ChannelStore, InMemoryChannelStore};
use crate::transports::builtin_plugins;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Builder for a configured [`ChannelManager`].
///
/// Defaults to an in-memory store and the built-in transports; tests swap
/// either out.
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn ChannelStore>>,
    plugins: Option<Vec<Arc<dyn TransportPlugin>>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            plugins: None,
        }
    }

    /// Overrides the channel store.
    pub fn store(mut self, store: Arc<dyn ChannelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the transport plugins.
    pub fn plugins(mut self, plugins: Vec<Arc<dyn TransportPlugin>>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Registers the plugins and seeds the configured channels.
    #[instrument(skip_all)]
    pub async fn build(self) -> Result<ChannelManager> {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryChannelStore::new()) as Arc<dyn ChannelStore>);
        let manager = ChannelManager::builder(store)
            .plugin_start_timeout(config.plugin_start_timeout())
            .probe_timeout(config.probe_timeout())
            .latency_window(config.metrics.latency_window)
            .plugin_options(config.plugin_options())
            .build();

        let plugins = self.plugins.unwrap_or_else(builtin_plugins);
        manager
            .register_plugins(plugins)
            .await
            .context("failed to register transport plugins")?;

        let seeded = seed_channels(&manager, &config.channels).await?;
        info!(
            plugins = manager.list_plugins().len(),
            channels = seeded.len(),
            "Dispatch engine ready"
        );
        Ok(manager)
    }
}

/// Creates every channel in `channels`, validating each against its plugin.
pub async fn seed_channels(manager: &ChannelManager, channels: &[NewChannel]) -> Result<Vec<Channel>> {
    let mut created = Vec::with_capacity(channels.len());
    for new in channels {
        let channel = manager
            .create_channel(new.clone())
            .await
            .with_context(|| format!("invalid channel `{}`", new.name))?;
        created.push(channel);
    }
    Ok(created)
}

/// Finds a channel by id, falling back to its name.
pub async fn resolve_channel(manager: &ChannelManager, key: &str) -> crate::error::Result<Channel> {
    match manager.get_channel(key).await {
        Err(DispatchError::ChannelNotFound(_)) => manager
            .list_channels(&ChannelFilter::default())
            .await?
            .into_iter()
            .find(|c| c.name == key)
            .ok_or_else(|| DispatchError::ChannelNotFound(key.to_string())),
        other => other,
    }
}

/// Runs the health monitor until `shutdown` is cancelled, then stops the
/// manager.
pub async fn serve(manager: ChannelManager, config: &Config, shutdown: CancellationToken) -> Result<()> {
    if config.health.enabled {
        manager.start_health_monitor(config.health_interval(), &shutdown)?;
    } else {
        info!("Periodic health monitoring is disabled");
    }

    shutdown.cancelled().await;
    info!("Shutdown signal received. Stopping dispatch engine...");
    manager.shutdown().await;
    Ok(())
}
