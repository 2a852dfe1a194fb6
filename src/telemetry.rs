//! Metric descriptions and the optional Prometheus exporter.

use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing::info;

/// Registers descriptions for every metric the dispatch engine emits.
pub fn describe_metrics() {
    metrics::describe_counter!("notifications_sent_total", Unit::Count, "Total number of notifications delivered, labeled by channel type.");
    metrics::describe_counter!("notifications_failed_total", Unit::Count, "Total number of notifications that failed, labeled by channel type.");
    metrics::describe_histogram!("notification_send_duration_seconds", Unit::Seconds, "Wall-clock time of a single channel send, labeled by channel type.");
    metrics::describe_counter!("channels_created_total", Unit::Count, "Total number of channels created, labeled by channel type.");
    metrics::describe_counter!("channels_deleted_total", Unit::Count, "Total number of channels deleted, labeled by channel type.");
    metrics::describe_gauge!("channel_health_status", Unit::Count, "Health of each channel (1 for healthy, 0 for unhealthy).");
    metrics::describe_gauge!("plugins_registered", Unit::Count, "The current number of registered transport plugins.");
    metrics::describe_gauge!("health_monitor_running", Unit::Count, "Whether the periodic health monitor is running (1) or not (0).");
}

/// Installs the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )?
        .install()?;
    describe_metrics();
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
