//! Channel Health Monitoring Service
//!
//! Probes channels through their transport plugin's `health_check` and caches
//! one `HealthStatus` per channel. Probes can be run on demand (single or
//! batched) or periodically by a background task.

use crate::core::{HealthState, HealthStatus};
use crate::error::{DispatchError, Result};
use crate::plugin::PluginRegistry;
use crate::store::ChannelStore;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default upper bound for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn ChannelStore>,
    registry: Arc<PluginRegistry>,
    statuses: RwLock<HashMap<String, HealthStatus>>,
    probe_timeout: Duration,
    running: Mutex<Option<RunningMonitor>>,
}

/// Monitors channel health via on-demand and periodic probes.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn ChannelStore>, registry: Arc<PluginRegistry>) -> Self {
        Self::with_probe_timeout(store, registry, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(
        store: Arc<dyn ChannelStore>,
        registry: Arc<PluginRegistry>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                statuses: RwLock::new(HashMap::new()),
                probe_timeout,
                running: Mutex::new(None),
            }),
        }
    }

    /// Probes one channel and records the outcome.
    ///
    /// Lookup failures (unknown channel, unregistered plugin) are recorded as
    /// `unhealthy` rather than returned. Cancellation leaves the cached
    /// status untouched and reports `unknown`, as does a channel deleted
    /// while its probe was in flight.
    pub async fn check_channel(&self, channel_id: &str, cancel: &CancellationToken) -> HealthStatus {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return HealthStatus::unknown(channel_id, "health check cancelled");
            }
            outcome = self.probe(channel_id) => outcome,
        };
        let lookup_failed = matches!(outcome, Err(DispatchError::ChannelNotFound(_)));
        if !lookup_failed && self.was_deleted(channel_id).await {
            return HealthStatus::unknown(channel_id, "channel deleted during health check");
        }
        self.record(channel_id, outcome, started.elapsed())
    }

    /// True when the channel disappeared from the store while a probe ran,
    /// so its result must not be cached after `forget`.
    async fn was_deleted(&self, channel_id: &str) -> bool {
        match self.inner.store.get_channel(channel_id).await {
            Err(DispatchError::ChannelNotFound(_)) => {
                debug!(channel_id, "Channel deleted during health check, discarding result");
                true
            }
            _ => false,
        }
    }

    async fn probe(&self, channel_id: &str) -> Result<()> {
        let channel = self.inner.store.get_channel(channel_id).await?;
        let plugin = self.inner.registry.get(channel.channel_type)?;
        match tokio::time::timeout(self.inner.probe_timeout, plugin.health_check(&channel.config)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::transport(format!(
                "health check timed out after {:?}",
                self.inner.probe_timeout
            ))),
        }
    }

    fn record(&self, channel_id: &str, outcome: Result<()>, response_time: Duration) -> HealthStatus {
        let now = Utc::now();
        let mut statuses = self.inner.statuses.write().unwrap_or_else(PoisonError::into_inner);
        let previous = statuses.get(channel_id);
        let previous_errors = previous.map_or(0, |s| s.error_count);

        let status = match outcome {
            Ok(()) => {
                if previous.is_some_and(|s| s.status == HealthState::Unhealthy) {
                    info!(channel_id, "Channel has RECOVERED and is now HEALTHY.");
                }
                HealthStatus {
                    channel_id: channel_id.to_string(),
                    status: HealthState::Healthy,
                    message: "channel is healthy".to_string(),
                    last_check: now,
                    response_time,
                    error_count: 0,
                    last_error: previous.and_then(|s| s.last_error.clone()),
                    last_error_at: previous.and_then(|s| s.last_error_at),
                }
            }
            Err(e) => {
                if previous_errors == 0 {
                    error!(channel_id, error = %e, "Health check failed. Channel is now UNHEALTHY.");
                } else {
                    warn!(channel_id, error = %e, errors = previous_errors + 1, "Health check failed. Channel remains UNHEALTHY.");
                }
                HealthStatus {
                    channel_id: channel_id.to_string(),
                    status: HealthState::Unhealthy,
                    message: format!("health check failed: {}", e),
                    last_check: now,
                    response_time,
                    error_count: previous_errors + 1,
                    last_error: Some(e.to_string()),
                    last_error_at: Some(now),
                }
            }
        };

        let gauge = if status.is_healthy() { 1.0 } else { 0.0 };
        metrics::gauge!("channel_health_status", "channel_id" => channel_id.to_string()).set(gauge);
        statuses.insert(channel_id.to_string(), status.clone());
        status
    }

    /// Probes every id concurrently. A probe that panics yields an `unknown`
    /// status for its id without affecting the others.
    pub async fn batch_check(&self, channel_ids: &[String], cancel: &CancellationToken) -> HashMap<String, HealthStatus> {
        let handles: Vec<_> = channel_ids
            .iter()
            .map(|id| {
                let monitor = self.clone();
                let id = id.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { monitor.check_channel(&id, &cancel).await })
            })
            .collect();

        let joined = join_all(handles).await;
        let mut statuses = HashMap::with_capacity(channel_ids.len());
        for (id, result) in channel_ids.iter().zip(joined) {
            let status = match result {
                Ok(status) => status,
                Err(e) => {
                    error!(channel_id = %id, error = %e, "Health check task failed");
                    let message = format!("health check aborted: {}", e);
                    if self.was_deleted(id).await {
                        HealthStatus::unknown(id, message)
                    } else {
                        self.record_unknown(id, message)
                    }
                }
            };
            statuses.insert(id.clone(), status);
        }
        statuses
    }

    fn record_unknown(&self, channel_id: &str, message: String) -> HealthStatus {
        let mut statuses = self.inner.statuses.write().unwrap_or_else(PoisonError::into_inner);
        let mut status = HealthStatus::unknown(channel_id, message);
        if let Some(previous) = statuses.get(channel_id) {
            status.error_count = previous.error_count;
            status.last_error = previous.last_error.clone();
            status.last_error_at = previous.last_error_at;
        }
        statuses.insert(channel_id.to_string(), status.clone());
        status
    }

    /// Probes every active channel once.
    pub async fn check_all(&self, cancel: &CancellationToken) -> Result<HashMap<String, HealthStatus>> {
        let ids: Vec<String> = self
            .inner
            .store
            .active_channels()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        debug!(channels = ids.len(), "Running fleet health check");
        Ok(self.batch_check(&ids, cancel).await)
    }

    /// Starts the periodic monitor. The loop ends when `parent` is cancelled
    /// or [`HealthMonitor::stop`] is called.
    pub fn start(&self, interval: Duration, parent: &CancellationToken) -> Result<()> {
        let mut running = self.inner.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(DispatchError::MonitorAlreadyRunning);
        }

        let token = parent.child_token();
        let monitor = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            debug!(?interval, "Spawning periodic channel health check task.");
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => {
                        info!("Health monitor task received shutdown signal.");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.check_all(&loop_token).await {
                            warn!(error = %e, "Could not list channels for health check");
                        }
                    }
                }
            }
            metrics::gauge!("health_monitor_running").set(0.0);
            info!("Health monitor task finished.");
        });

        metrics::gauge!("health_monitor_running").set(1.0);
        *running = Some(RunningMonitor { token, handle });
        Ok(())
    }

    /// Stops the periodic monitor and waits for its task to exit.
    ///
    /// Fails with [`DispatchError::MonitorNotRunning`] if it was never
    /// started or has already been stopped.
    pub async fn stop(&self) -> Result<()> {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DispatchError::MonitorNotRunning)?;
        running.token.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Health monitor task ended abnormally");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Cached status for one channel, without probing.
    pub fn status(&self, channel_id: &str) -> Option<HealthStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel_id)
            .cloned()
    }

    /// All cached statuses, without probing.
    pub fn statuses(&self) -> HashMap<String, HealthStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Discards the cached status of a deleted channel.
    pub fn forget(&self, channel_id: &str) {
        self.inner
            .statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel_id);
    }
}
