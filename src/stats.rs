//! In-process delivery statistics.
//!
//! `MetricsCollector` keeps per-channel-type counters and a bounded window of
//! recent latencies. Derived values (success rate, average latency) are
//! computed on read. Every mutation is also mirrored to the `metrics` facade
//! so an installed Prometheus recorder sees the same events.

use crate::core::ChannelType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Default number of latency samples retained per channel type.
pub const DEFAULT_LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct Accumulator {
    messages_sent: u64,
    messages_failed: u64,
    channels_created: u64,
    channels_deleted: u64,
    latencies: VecDeque<Duration>,
}

/// Snapshot of one channel type's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub channel_type: ChannelType,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub channels_created: u64,
    pub channels_deleted: u64,
    /// Percentage in `[0, 100]`.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub latency_samples: usize,
}

impl TypeStats {
    fn empty(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            messages_sent: 0,
            messages_failed: 0,
            channels_created: 0,
            channels_deleted: 0,
            success_rate: 0.0,
            avg_latency_ms: 0.0,
            latency_samples: 0,
        }
    }
}

/// Rollup over every channel type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GlobalStats {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub channels_created: u64,
    pub channels_deleted: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub by_type: BTreeMap<ChannelType, TypeStats>,
}

fn success_rate(sent: u64, failed: u64) -> f64 {
    let total = sent + failed;
    if total == 0 {
        0.0
    } else {
        sent as f64 / total as f64 * 100.0
    }
}

fn mean_ms<'a>(samples: impl Iterator<Item = &'a Duration>) -> (f64, usize) {
    let (sum, count) = samples.fold((0.0, 0usize), |(sum, count), d| {
        (sum + d.as_secs_f64() * 1000.0, count + 1)
    });
    if count == 0 {
        (0.0, 0)
    } else {
        (sum / count as f64, count)
    }
}

/// Thread-safe delivery counters keyed by channel type.
#[derive(Debug)]
pub struct MetricsCollector {
    window: usize,
    by_type: RwLock<HashMap<ChannelType, Accumulator>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl MetricsCollector {
    /// Creates a collector retaining at most `window` latencies per type.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    fn update(&self, channel_type: ChannelType, f: impl FnOnce(&mut Accumulator)) {
        let mut by_type = self.by_type.write().unwrap_or_else(PoisonError::into_inner);
        f(by_type.entry(channel_type).or_default());
    }

    pub fn inc_message_sent(&self, channel_type: ChannelType) {
        self.update(channel_type, |acc| acc.messages_sent += 1);
        metrics::counter!("notifications_sent_total", "channel_type" => channel_type.as_str()).increment(1);
    }

    pub fn inc_message_failed(&self, channel_type: ChannelType) {
        self.update(channel_type, |acc| acc.messages_failed += 1);
        metrics::counter!("notifications_failed_total", "channel_type" => channel_type.as_str()).increment(1);
    }

    /// Records a latency sample, evicting the oldest once the window is full.
    pub fn record_latency(&self, channel_type: ChannelType, latency: Duration) {
        let window = self.window;
        self.update(channel_type, |acc| {
            if acc.latencies.len() == window {
                acc.latencies.pop_front();
            }
            acc.latencies.push_back(latency);
        });
        metrics::histogram!("notification_send_duration_seconds", "channel_type" => channel_type.as_str())
            .record(latency.as_secs_f64());
    }

    pub fn inc_channel_created(&self, channel_type: ChannelType) {
        self.update(channel_type, |acc| acc.channels_created += 1);
        metrics::counter!("channels_created_total", "channel_type" => channel_type.as_str()).increment(1);
    }

    pub fn inc_channel_deleted(&self, channel_type: ChannelType) {
        self.update(channel_type, |acc| acc.channels_deleted += 1);
        metrics::counter!("channels_deleted_total", "channel_type" => channel_type.as_str()).increment(1);
    }

    /// Counters for one type; all zero if nothing was recorded.
    pub fn type_stats(&self, channel_type: ChannelType) -> TypeStats {
        let by_type = self.by_type.read().unwrap_or_else(PoisonError::into_inner);
        by_type
            .get(&channel_type)
            .map(|acc| Self::snapshot(channel_type, acc))
            .unwrap_or_else(|| TypeStats::empty(channel_type))
    }

    fn snapshot(channel_type: ChannelType, acc: &Accumulator) -> TypeStats {
        let (avg_latency_ms, latency_samples) = mean_ms(acc.latencies.iter());
        TypeStats {
            channel_type,
            messages_sent: acc.messages_sent,
            messages_failed: acc.messages_failed,
            channels_created: acc.channels_created,
            channels_deleted: acc.channels_deleted,
            success_rate: success_rate(acc.messages_sent, acc.messages_failed),
            avg_latency_ms,
            latency_samples,
        }
    }

    /// Sums every type; the average latency spans all retained samples.
    pub fn global_stats(&self) -> GlobalStats {
        let by_type = self.by_type.read().unwrap_or_else(PoisonError::into_inner);
        let mut global = GlobalStats::default();
        for (channel_type, acc) in by_type.iter() {
            global.messages_sent += acc.messages_sent;
            global.messages_failed += acc.messages_failed;
            global.channels_created += acc.channels_created;
            global.channels_deleted += acc.channels_deleted;
            global
                .by_type
                .insert(*channel_type, Self::snapshot(*channel_type, acc));
        }
        global.success_rate = success_rate(global.messages_sent, global.messages_failed);
        global.avg_latency_ms = mean_ms(by_type.values().flat_map(|acc| acc.latencies.iter())).0;
        global
    }

    /// Clears all counters and samples.
    pub fn reset(&self) {
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
