use super::{PluginInfo, TransportPlugin};
use crate::core::ChannelType;
use crate::error::{DispatchError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Lookup table of transport plugins keyed by channel type.
///
/// Registration is rare and lookups are frequent, so the map sits behind a
/// reader/writer lock and plugins are handed out as `Arc`s.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<ChannelType, Arc<dyn TransportPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin. A second plugin for the same type is rejected.
    pub fn register(&self, plugin: Arc<dyn TransportPlugin>) -> Result<()> {
        let channel_type = plugin.channel_type();
        let mut plugins = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        if plugins.contains_key(&channel_type) {
            return Err(DispatchError::PluginAlreadyRegistered(channel_type));
        }
        plugins.insert(channel_type, plugin);
        metrics::gauge!("plugins_registered").set(plugins.len() as f64);
        info!(%channel_type, "Registered transport plugin");
        Ok(())
    }

    /// Stops and removes a plugin. Stop failures are logged, not returned.
    pub async fn unregister(&self, channel_type: ChannelType) -> Result<()> {
        let plugin = {
            let mut plugins = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
            let plugin = plugins
                .remove(&channel_type)
                .ok_or(DispatchError::PluginNotFound(channel_type))?;
            metrics::gauge!("plugins_registered").set(plugins.len() as f64);
            plugin
        };

        if let Err(e) = plugin.stop().await {
            warn!(%channel_type, error = %e, "Plugin failed to stop cleanly");
        }
        info!(%channel_type, "Unregistered transport plugin");
        Ok(())
    }

    pub fn get(&self, channel_type: ChannelType) -> Result<Arc<dyn TransportPlugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_type)
            .cloned()
            .ok_or(DispatchError::PluginNotFound(channel_type))
    }

    pub fn contains(&self, channel_type: ChannelType) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&channel_type)
    }

    /// Plugin descriptors ordered by channel type.
    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|p| p.info())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
