//! Channel persistence.
//!
//! The dispatch engine reads channels through [`ChannelStore`]; it never owns
//! their storage. [`InMemoryChannelStore`] backs the binary and the tests.

use crate::core::{Channel, ChannelFilter, ChannelStatus, ChannelUpdate, NewChannel};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The channel persistence service consumed by the manager and monitor.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn create_channel(&self, new: NewChannel) -> Result<Channel>;

    async fn get_channel(&self, id: &str) -> Result<Channel>;

    async fn update_channel(&self, id: &str, update: ChannelUpdate) -> Result<Channel>;

    async fn delete_channel(&self, id: &str) -> Result<Channel>;

    /// Channels matching `filter`, ordered by descending priority then name.
    async fn list_channels(&self, filter: &ChannelFilter) -> Result<Vec<Channel>>;

    async fn active_channels(&self) -> Result<Vec<Channel>> {
        self.list_channels(&ChannelFilter {
            status: Some(ChannelStatus::Active),
            ..Default::default()
        })
        .await
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool>;
}

/// A `ChannelStore` kept in memory.
#[derive(Default)]
pub struct InMemoryChannelStore {
    channels: RwLock<HashMap<String, Channel>>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DispatchError::config("name", "channel name must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn create_channel(&self, new: NewChannel) -> Result<Channel> {
        check_name(&new.name)?;
        let mut channels = self.channels.write().await;
        if channels.values().any(|c| c.name == new.name) {
            return Err(DispatchError::DuplicateName(new.name));
        }

        let now = Utc::now();
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            channel_type: new.channel_type,
            description: new.description,
            config: new.config,
            status: new.status,
            priority: new.priority,
            tags: new.tags,
            labels: new.labels,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        channels.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    async fn get_channel(&self, id: &str) -> Result<Channel> {
        self.channels
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::ChannelNotFound(id.to_string()))
    }

    async fn update_channel(&self, id: &str, update: ChannelUpdate) -> Result<Channel> {
        let mut channels = self.channels.write().await;
        if let Some(name) = &update.name {
            check_name(name)?;
            if channels.values().any(|c| c.id != id && &c.name == name) {
                return Err(DispatchError::DuplicateName(name.clone()));
            }
        }

        let channel = channels
            .get_mut(id)
            .ok_or_else(|| DispatchError::ChannelNotFound(id.to_string()))?;
        if let Some(name) = update.name {
            channel.name = name;
        }
        if let Some(description) = update.description {
            channel.description = description;
        }
        if let Some(config) = update.config {
            channel.config = config;
        }
        if let Some(status) = update.status {
            channel.status = status;
        }
        if let Some(priority) = update.priority {
            channel.priority = priority;
        }
        if let Some(tags) = update.tags {
            channel.tags = tags;
        }
        if let Some(labels) = update.labels {
            channel.labels = labels;
        }
        channel.updated_at = Utc::now();
        channel.version += 1;
        Ok(channel.clone())
    }

    async fn delete_channel(&self, id: &str) -> Result<Channel> {
        self.channels
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DispatchError::ChannelNotFound(id.to_string()))
    }

    async fn list_channels(&self, filter: &ChannelFilter) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .await
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        channels.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(channels)
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.channels.read().await.values().any(|c| c.name == name))
    }
}
