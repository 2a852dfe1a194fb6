//! Per-channel send-rate enforcement: a token bucket plus an optional
//! per-UTC-day cap.

use crate::core::RateLimitPolicy;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// Why a send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttled {
    RateLimited,
    DailyCapReached,
}

impl fmt::Display for Throttled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Throttled::RateLimited => f.write_str("rate limit exceeded"),
            Throttled::DailyCapReached => f.write_str("daily send cap reached"),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    policy: RateLimitPolicy,
    tokens: f64,
    refilled_at: Instant,
    day: NaiveDate,
    sent_today: u32,
}

impl Bucket {
    fn new(policy: &RateLimitPolicy, now: Instant, today: NaiveDate) -> Self {
        Self {
            policy: policy.clone(),
            tokens: capacity(policy),
            refilled_at: now,
            day: today,
            sent_today: 0,
        }
    }

    fn refill(&mut self, now: Instant) {
        let window = self.policy.window_seconds.max(1) as f64;
        let per_second = f64::from(self.policy.rate) / window;
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity(&self.policy));
        self.refilled_at = now;
    }
}

fn capacity(policy: &RateLimitPolicy) -> f64 {
    let burst = if policy.burst == 0 { policy.rate } else { policy.burst };
    f64::from(burst.max(1))
}

/// Token buckets keyed by channel id.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one token for `channel_id`. Disabled policies always pass.
    pub fn try_acquire(&self, channel_id: &str, policy: &RateLimitPolicy) -> Result<(), Throttled> {
        self.try_acquire_at(channel_id, policy, Instant::now(), Utc::now().date_naive())
    }

    fn try_acquire_at(
        &self,
        channel_id: &str,
        policy: &RateLimitPolicy,
        now: Instant,
        today: NaiveDate,
    ) -> Result<(), Throttled> {
        if !policy.enabled {
            return Ok(());
        }
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(channel_id.to_string())
            .or_insert_with(|| Bucket::new(policy, now, today));
        if bucket.policy != *policy {
            *bucket = Bucket::new(policy, now, today);
        }
        if bucket.day != today {
            bucket.day = today;
            bucket.sent_today = 0;
        }

        if let Some(cap) = policy.daily_cap {
            if bucket.sent_today >= cap {
                return Err(Throttled::DailyCapReached);
            }
        }
        bucket.refill(now);
        if bucket.tokens < 1.0 {
            return Err(Throttled::RateLimited);
        }
        bucket.tokens -= 1.0;
        bucket.sent_today += 1;
        Ok(())
    }

    /// Drops the state of a deleted channel.
    pub fn forget(&self, channel_id: &str) {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel_id);
    }
}
