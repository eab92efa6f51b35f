//! Quota-aware rate limiter for Gmail API
//!
//! Gmail charges "quota units" per call against a per-user budget of 250 units
//! per second. The calls this crate makes cost:
//! - `messages.list`: 5 units
//! - `messages.trash`: 5 units
//! - `messages.batchModify`: 50 units
//!
//! A token bucket refills at the configured rate and blocks callers while the
//! bucket cannot cover the cost of their call.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::QuotaConfig;

/// Gmail API calls made by the adapter, priced in quota units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCost {
    List,
    Trash,
    BatchModify,
    GetProfile,
}

impl QuotaCost {
    pub fn units(&self) -> u32 {
        match self {
            QuotaCost::List | QuotaCost::Trash | QuotaCost::GetProfile => 5,
            QuotaCost::BatchModify => 50,
        }
    }
}

/// Token bucket shared by clones
#[derive(Debug, Clone)]
pub struct QuotaRateLimiter {
    inner: Arc<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    available_units: f64,
    max_units: f64,
    refill_rate: f64,
    last_refill: Instant,
    total_consumed: u64,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available_units = (self.available_units + elapsed * self.refill_rate).min(self.max_units);
        self.last_refill = now;
    }
}

impl QuotaRateLimiter {
    /// Limiter with Gmail's default per-user quota
    pub fn new() -> Self {
        Self::from_config(&QuotaConfig::default())
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::with_config(config.units_per_second, config.burst_units)
    }

    /// # Arguments
    /// * `refill_rate` - Quota units added per second
    /// * `max_units` - Maximum burst capacity
    pub fn with_config(refill_rate: f64, max_units: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                available_units: max_units,
                max_units,
                refill_rate,
                last_refill: Instant::now(),
                total_consumed: 0,
            })),
        }
    }

    /// Wait until the bucket covers `cost`, then consume it
    pub async fn acquire(&self, cost: QuotaCost) {
        let units_needed = cost.units() as f64;

        loop {
            let wait_time = {
                let mut bucket = self.inner.lock().await;
                bucket.refill();

                trace!(
                    "Quota state: {:.1}/{:.1} units available, requesting {:.0}",
                    bucket.available_units,
                    bucket.max_units,
                    units_needed
                );

                if bucket.available_units >= units_needed {
                    bucket.available_units -= units_needed;
                    bucket.total_consumed += units_needed as u64;
                    return;
                }

                let deficit = units_needed - bucket.available_units;
                Duration::from_secs_f64(deficit / bucket.refill_rate)
            };

            // Sleep outside the lock so other callers can refill-check
            debug!(
                "Quota exhausted, waiting {:.2}s for {} units",
                wait_time.as_secs_f64(),
                units_needed
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    pub async fn available(&self) -> f64 {
        let mut bucket = self.inner.lock().await;
        bucket.refill();
        bucket.available_units
    }

    pub async fn total_consumed(&self) -> u64 {
        self.inner.lock().await.total_consumed
    }
}

impl Default for QuotaRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
