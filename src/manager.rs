//! The dispatch façade.
//!
//! `ChannelManager` ties the channel store, the plugin registry, the health
//! monitor, the rate limiter and the statistics collector together. Every
//! send, test and probe goes through it.

use crate::core::{
    Channel, ChannelFilter, ChannelStatus, ChannelType, ChannelUpdate, HealthStatus, Message,
    NewChannel, SendResult, Settings, TestResult,
};
use crate::error::{DispatchError, Result};
use crate::filter::rejecting_filter;
use crate::formatting::{render_template, Escape};
use crate::health::{HealthMonitor, DEFAULT_PROBE_TIMEOUT};
use crate::plugin::{PluginInfo, PluginRegistry, TransportPlugin};
use crate::ratelimit::RateLimiter;
use crate::stats::{GlobalStats, MetricsCollector, TypeStats, DEFAULT_LATENCY_WINDOW};
use crate::store::ChannelStore;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on a plugin's `initialize` + `start` during registration.
pub const DEFAULT_PLUGIN_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-type statistics enriched with the current channel inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    #[serde(flatten)]
    pub stats: TypeStats,
    pub channels_total: usize,
    pub channels_by_status: BTreeMap<ChannelStatus, usize>,
}

/// Global statistics enriched with the current channel inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetStats {
    #[serde(flatten)]
    pub stats: GlobalStats,
    pub channels_total: usize,
    pub channels_by_type: BTreeMap<ChannelType, usize>,
    pub channels_by_status: BTreeMap<ChannelStatus, usize>,
}

/// Builder for [`ChannelManager`].
pub struct ChannelManagerBuilder {
    store: Arc<dyn ChannelStore>,
    plugin_start_timeout: Duration,
    probe_timeout: Duration,
    latency_window: usize,
    plugin_options: Settings,
}

impl ChannelManagerBuilder {
    pub fn new(store: Arc<dyn ChannelStore>) -> Self {
        Self {
            store,
            plugin_start_timeout: DEFAULT_PLUGIN_START_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            latency_window: DEFAULT_LATENCY_WINDOW,
            plugin_options: Settings::new(),
        }
    }

    pub fn plugin_start_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_start_timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Number of latency samples retained per channel type.
    pub fn latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Options handed to every plugin's `initialize` (e.g. `user_agent`).
    pub fn plugin_options(mut self, options: Settings) -> Self {
        self.plugin_options = options;
        self
    }

    pub fn build(self) -> ChannelManager {
        let registry = Arc::new(PluginRegistry::new());
        let health = HealthMonitor::with_probe_timeout(self.store.clone(), registry.clone(), self.probe_timeout);
        ChannelManager {
            store: self.store,
            registry,
            health,
            stats: Arc::new(MetricsCollector::new(self.latency_window)),
            limiter: Arc::new(RateLimiter::new()),
            plugin_start_timeout: self.plugin_start_timeout,
            plugin_options: Arc::new(self.plugin_options),
        }
    }
}

/// Orchestrates channel CRUD, dispatch, testing and health probing.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct ChannelManager {
    store: Arc<dyn ChannelStore>,
    registry: Arc<PluginRegistry>,
    health: HealthMonitor,
    stats: Arc<MetricsCollector>,
    limiter: Arc<RateLimiter>,
    plugin_start_timeout: Duration,
    plugin_options: Arc<Settings>,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("plugin_start_timeout", &self.plugin_start_timeout)
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    pub fn builder(store: Arc<dyn ChannelStore>) -> ChannelManagerBuilder {
        ChannelManagerBuilder::new(store)
    }

    pub fn new(store: Arc<dyn ChannelStore>) -> Self {
        Self::builder(store).build()
    }

    // =========================================================================
    // Plugins
    // =========================================================================

    /// Initializes and starts `plugin`, then makes it available for dispatch.
    ///
    /// Nothing is registered if a plugin for the same type already exists,
    /// or if `initialize`/`start` fail or exceed the start timeout.
    #[instrument(skip_all, fields(channel_type = %plugin.channel_type(), plugin = plugin.name()))]
    pub async fn register_plugin(&self, plugin: Arc<dyn TransportPlugin>) -> Result<()> {
        let channel_type = plugin.channel_type();
        if self.registry.contains(channel_type) {
            return Err(DispatchError::PluginAlreadyRegistered(channel_type));
        }

        let boot = async {
            plugin.initialize(&self.plugin_options).await?;
            plugin.start().await
        };
        let failure = match tokio::time::timeout(self.plugin_start_timeout, boot).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!(error = %e, "Plugin failed to start");
                Some(e)
            }
            Err(_) => {
                error!(timeout = ?self.plugin_start_timeout, "Plugin start timed out");
                Some(DispatchError::lifecycle(
                    plugin.name(),
                    "start",
                    format!("timed out after {:?}", self.plugin_start_timeout),
                ))
            }
        };
        if let Some(e) = failure {
            // Release whatever a partial initialize/start acquired.
            if let Err(stop_err) = plugin.stop().await {
                warn!(error = %stop_err, "Plugin failed to stop after aborted start");
            }
            return Err(e);
        }

        if let Err(e) = self.registry.register(plugin.clone()) {
            // Lost a race with a concurrent registration for the same type.
            if let Err(stop_err) = plugin.stop().await {
                warn!(error = %stop_err, "Plugin failed to stop after rejected registration");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Registers every plugin in `plugins`, stopping at the first failure.
    pub async fn register_plugins(&self, plugins: impl IntoIterator<Item = Arc<dyn TransportPlugin>>) -> Result<()> {
        for plugin in plugins {
            self.register_plugin(plugin).await?;
        }
        Ok(())
    }

    pub async fn unregister_plugin(&self, channel_type: ChannelType) -> Result<()> {
        self.registry.unregister(channel_type).await
    }

    pub fn get_plugin(&self, channel_type: ChannelType) -> Result<Arc<dyn TransportPlugin>> {
        self.registry.get(channel_type)
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.registry.list()
    }

    pub fn plugin_schema(&self, channel_type: ChannelType) -> Result<Value> {
        Ok(self.registry.get(channel_type)?.config_schema())
    }

    /// Validates transport settings against the plugin for `channel_type`.
    pub fn validate_config(&self, channel_type: ChannelType, settings: &Settings) -> Result<()> {
        self.registry.get(channel_type)?.validate_config(settings)
    }

    // =========================================================================
    // Channels
    // =========================================================================

    #[instrument(skip_all, fields(name = %new.name, channel_type = %new.channel_type))]
    pub async fn create_channel(&self, new: NewChannel) -> Result<Channel> {
        self.validate_config(new.channel_type, &new.config.settings)?;
        let channel = self.store.create_channel(new).await?;
        self.stats.inc_channel_created(channel.channel_type);
        info!(channel_id = %channel.id, "Channel created");
        Ok(channel)
    }

    #[instrument(skip(self, update))]
    pub async fn update_channel(&self, channel_id: &str, update: ChannelUpdate) -> Result<Channel> {
        let existing = self.store.get_channel(channel_id).await?;
        if let Some(config) = &update.config {
            self.validate_config(existing.channel_type, &config.settings)?;
        }
        let channel = self.store.update_channel(channel_id, update).await?;
        if channel.config.rate_limit != existing.config.rate_limit {
            self.limiter.forget(channel_id);
        }
        debug!(version = channel.version, "Channel updated");
        Ok(channel)
    }

    #[instrument(skip(self))]
    pub async fn delete_channel(&self, channel_id: &str) -> Result<()> {
        let channel = self.store.delete_channel(channel_id).await?;
        self.stats.inc_channel_deleted(channel.channel_type);
        self.health.forget(channel_id);
        self.limiter.forget(channel_id);
        info!(name = %channel.name, "Channel deleted");
        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        self.store.get_channel(channel_id).await
    }

    pub async fn list_channels(&self, filter: &ChannelFilter) -> Result<Vec<Channel>> {
        self.store.list_channels(filter).await
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Delivers `message` on one channel.
    ///
    /// Unknown channels, and unregistered plugin types of sendable
    /// channels, are returned as errors. Everything after lookup (not sendable, filtered, throttled,
    /// plugin errors, cancellation) is reported through the `SendResult`.
    #[instrument(skip(self, message, cancel), fields(message_id = %message.id))]
    pub async fn send_message(&self, channel_id: &str, message: &Message, cancel: &CancellationToken) -> Result<SendResult> {
        let channel = self.store.get_channel(channel_id).await?;
        let skipped = |reason: String| {
            SendResult::skipped(reason)
                .with_channel(channel_id)
                .with_message_id(message.id.clone())
        };

        if !channel.can_send() {
            debug!(status = %channel.status, enabled = channel.config.enabled, "Channel is not sendable");
            return Ok(skipped(format!(
                "channel is not sendable (status: {}, enabled: {})",
                channel.status, channel.config.enabled
            )));
        }
        let plugin = self.registry.get(channel.channel_type)?;
        if let Some(filter) = rejecting_filter(&channel.config.filters, message) {
            debug!(field = %filter.field, "Message rejected by delivery filter");
            return Ok(skipped(format!("message rejected by filter on `{}`", filter.field)));
        }
        if let Err(throttled) = self.limiter.try_acquire(&channel.id, &channel.config.rate_limit) {
            warn!(reason = %throttled, "Send throttled");
            self.stats.inc_message_failed(channel.channel_type);
            return Ok(skipped(throttled.to_string()));
        }

        let message = apply_template(&channel, message);
        let started = Instant::now();
        let outcome = plugin.send_message(&channel.config, &message, cancel).await;
        let latency = started.elapsed();

        let mut result = match outcome {
            Ok(result) => result,
            Err(DispatchError::Cancelled) => SendResult::cancelled(),
            Err(e) => {
                warn!(error = %e, "Plugin rejected the send");
                SendResult::failed(e.to_string())
            }
        }
        .with_channel(channel_id)
        .with_latency(latency);
        if result.message_id.is_none() {
            result.message_id = Some(message.id.clone());
        }

        self.stats.record_latency(channel.channel_type, latency);
        if result.success {
            self.stats.inc_message_sent(channel.channel_type);
            info!(channel_type = %channel.channel_type, ?latency, retries = result.retry_count, "Message delivered");
        } else {
            self.stats.inc_message_failed(channel.channel_type);
            warn!(
                channel_type = %channel.channel_type,
                outcome = ?result.outcome,
                error = result.error.as_deref().unwrap_or_default(),
                "Message not delivered"
            );
        }
        Ok(result)
    }

    /// Delivers `message` on every channel concurrently.
    ///
    /// `results[i]` always belongs to `channel_ids[i]`. A failing, slow or
    /// panicking channel never affects the result of another.
    pub async fn broadcast_message(
        &self,
        channel_ids: &[String],
        message: &Message,
        cancel: &CancellationToken,
    ) -> Vec<SendResult> {
        let message = Arc::new(message.clone());
        let handles: Vec<_> = channel_ids
            .iter()
            .map(|id| {
                let manager = self.clone();
                let id = id.clone();
                let message = message.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { manager.send_message(&id, &message, &cancel).await })
            })
            .collect();

        let joined = join_all(handles).await;
        channel_ids
            .iter()
            .zip(joined)
            .map(|(id, joined)| {
                let failure = match joined {
                    Ok(Ok(result)) => return result,
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => {
                        error!(channel_id = %id, error = %e, "Send task failed");
                        format!("send task aborted: {}", e)
                    }
                };
                SendResult::failed(failure)
                    .with_channel(id.clone())
                    .with_message_id(message.id.clone())
            })
            .collect()
    }

    /// Runs the plugin's connection test against one channel.
    #[instrument(skip(self, cancel))]
    pub async fn test_channel(&self, channel_id: &str, cancel: &CancellationToken) -> Result<TestResult> {
        let channel = self.store.get_channel(channel_id).await?;
        let plugin = self.registry.get(channel.channel_type)?;

        let started = Instant::now();
        let result = match plugin.test_connection(&channel.config, cancel).await {
            Ok(result) => result,
            Err(DispatchError::Cancelled) => TestResult::failed("test cancelled", started.elapsed()),
            Err(e) => TestResult::failed(e.to_string(), started.elapsed()),
        };
        info!(success = result.success, latency = ?result.latency, "Channel test finished");
        Ok(result
            .with_detail("channel_id", channel.id)
            .with_detail("channel_type", channel.channel_type.as_str()))
    }

    // =========================================================================
    // Health
    // =========================================================================

    pub async fn health_check(&self, channel_id: &str, cancel: &CancellationToken) -> HealthStatus {
        self.health.check_channel(channel_id, cancel).await
    }

    pub async fn batch_health_check(
        &self,
        channel_ids: &[String],
        cancel: &CancellationToken,
    ) -> HashMap<String, HealthStatus> {
        self.health.batch_check(channel_ids, cancel).await
    }

    /// Probes every active channel once.
    pub async fn check_all_channels(&self, cancel: &CancellationToken) -> Result<HashMap<String, HealthStatus>> {
        self.health.check_all(cancel).await
    }

    pub fn start_health_monitor(&self, interval: Duration, parent: &CancellationToken) -> Result<()> {
        self.health.start(interval, parent)?;
        info!(?interval, "Health monitor started");
        Ok(())
    }

    pub async fn stop_health_monitor(&self) -> Result<()> {
        self.health.stop().await?;
        info!("Health monitor stopped");
        Ok(())
    }

    pub fn health_monitor_running(&self) -> bool {
        self.health.is_running()
    }

    /// Last recorded status, without probing.
    pub fn health_status(&self, channel_id: &str) -> Option<HealthStatus> {
        self.health.status(channel_id)
    }

    pub fn health_statuses(&self) -> HashMap<String, HealthStatus> {
        self.health.statuses()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub async fn channel_stats(&self, channel_type: ChannelType) -> Result<ChannelStats> {
        let channels = self
            .store
            .list_channels(&ChannelFilter {
                channel_type: Some(channel_type),
                ..Default::default()
            })
            .await?;
        Ok(ChannelStats {
            stats: self.stats.type_stats(channel_type),
            channels_total: channels.len(),
            channels_by_status: count_by(&channels, |c| c.status),
        })
    }

    pub async fn global_stats(&self) -> Result<FleetStats> {
        let channels = self.store.list_channels(&ChannelFilter::default()).await?;
        Ok(FleetStats {
            stats: self.stats.global_stats(),
            channels_total: channels.len(),
            channels_by_type: count_by(&channels, |c| c.channel_type),
            channels_by_status: count_by(&channels, |c| c.status),
        })
    }

    /// The underlying collector, for direct reads and `reset`.
    pub fn stats(&self) -> &MetricsCollector {
        &self.stats
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops the health monitor (if running) and unregisters every plugin.
    pub async fn shutdown(&self) {
        match self.health.stop().await {
            Ok(()) | Err(DispatchError::MonitorNotRunning) => {}
            Err(e) => warn!(error = %e, "Failed to stop health monitor"),
        }
        for info in self.registry.list() {
            if let Err(e) = self.registry.unregister(info.channel_type).await {
                warn!(channel_type = %info.channel_type, error = %e, "Failed to unregister plugin");
            }
        }
        info!("Channel manager shut down");
    }
}

/// Renders the channel's title/content templates. A template that fails to
/// render leaves that field unchanged.
fn apply_template<'a>(channel: &Channel, message: &'a Message) -> Cow<'a, Message> {
    let template = &channel.config.template;
    if template.is_empty() {
        return Cow::Borrowed(message);
    }

    let render = |source: &Option<String>, original: &str, field: &str| match source {
        None => original.to_string(),
        Some(source) => render_template(source, message, Escape::None).unwrap_or_else(|e| {
            warn!(channel_id = %channel.id, field, error = %e, "Template rendering failed, using original text");
            original.to_string()
        }),
    };
    let mut rendered = message.clone();
    rendered.title = render(&template.title, &message.title, "title");
    rendered.content = render(&template.content, &message.content, "content");
    Cow::Owned(rendered)
}

fn count_by<K: Ord>(channels: &[Channel], key: impl Fn(&Channel) -> K) -> BTreeMap<K, usize> {
    channels.iter().fold(BTreeMap::new(), |mut counts, channel| {
        *counts.entry(key(channel)).or_insert(0) += 1;
        counts
    })
}
