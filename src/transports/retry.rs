//! Fixed-interval retry with a cancellable wait between attempts.

use crate::core::{ChannelConfig, Settings};
use crate::error::{DispatchError, Result};
use crate::schema::settings;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many extra attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub retries: u32,
    pub interval: Duration,
}

impl RetrySchedule {
    pub const NONE: RetrySchedule = RetrySchedule {
        retries: 0,
        interval: Duration::ZERO,
    };

    /// Reads `retry_count`/`retry_interval` from settings, falling back to
    /// the channel's retry policy.
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::from_settings(&config.settings, config)
    }

    fn from_settings(settings: &Settings, config: &ChannelConfig) -> Self {
        let retries = settings::u64(settings, "retry_count")
            .map(|n| n as u32)
            .unwrap_or(config.retry.max_retries);
        let interval = settings::u64(settings, "retry_interval").unwrap_or(config.retry.interval_seconds);
        Self {
            retries,
            interval: Duration::from_secs(interval),
        }
    }
}

/// Result of a retried operation that was not cancelled.
#[derive(Debug)]
pub enum Attempted<T> {
    Succeeded { value: T, retries: u32 },
    Failed { error: DispatchError, retries: u32 },
}

/// Runs `attempt` until it succeeds, fails terminally or the schedule is
/// exhausted. `attempt` receives the zero-based attempt number.
///
/// Cancellation, whether observed by the attempt itself or during the wait,
/// aborts immediately with [`DispatchError::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    schedule: RetrySchedule,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<Attempted<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut n = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        match attempt(n).await {
            Ok(value) => return Ok(Attempted::Succeeded { value, retries: n }),
            Err(DispatchError::Cancelled) => return Err(DispatchError::Cancelled),
            Err(error) if !error.is_retryable() || n >= schedule.retries => {
                debug!(attempt = n, error = %error, "Giving up on delivery");
                return Ok(Attempted::Failed { error, retries: n });
            }
            Err(error) => {
                warn!(
                    attempt = n + 1,
                    max_attempts = schedule.retries + 1,
                    error = %error,
                    "Delivery attempt failed, retrying in {:?}",
                    schedule.interval
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            _ = tokio::time::sleep(schedule.interval) => {}
        }
        n += 1;
    }
}
