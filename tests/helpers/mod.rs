//! Shared fixtures for integration tests.
#![allow(dead_code)]

use alertrelay::core::{ChannelConfig, ChannelType, NewChannel, Channel};
use alertrelay::manager::ChannelManager;
use alertrelay::store::InMemoryChannelStore;
use alertrelay::test_utils::{scripted_config, ScriptedTransport};
use alertrelay::transports::builtin_plugins;
use serde_json::Value;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A manager with every built-in transport registered.
pub async fn builtin_manager() -> ChannelManager {
    init_tracing();
    let manager = ChannelManager::new(Arc::new(InMemoryChannelStore::new()));
    manager.register_plugins(builtin_plugins()).await.unwrap();
    manager
}

/// A manager whose only transport is a scripted fake for `channel_type`.
pub async fn scripted_manager(channel_type: ChannelType) -> (ChannelManager, Arc<ScriptedTransport>) {
    init_tracing();
    let manager = ChannelManager::new(Arc::new(InMemoryChannelStore::new()));
    let plugin = Arc::new(ScriptedTransport::new(channel_type));
    manager.register_plugin(plugin.clone()).await.unwrap();
    (manager, plugin)
}

/// Creates a scripted channel whose name and `target` are both `target`.
pub async fn scripted_channel(manager: &ChannelManager, channel_type: ChannelType, target: &str) -> Channel {
    manager
        .create_channel(NewChannel::new(target, channel_type, scripted_config(target)))
        .await
        .unwrap()
}

/// Channel config from a JSON settings object.
pub fn config(settings: Value) -> ChannelConfig {
    ChannelConfig::with_settings(settings)
}

pub async fn create(manager: &ChannelManager, name: &str, channel_type: ChannelType, settings: Value) -> Channel {
    manager
        .create_channel(NewChannel::new(name, channel_type, config(settings)))
        .await
        .unwrap()
}
