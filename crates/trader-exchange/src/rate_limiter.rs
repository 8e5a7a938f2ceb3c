//! Token-bucket rate limiting for API calls.
//!
//! One global bucket per exchange, plus optional per-endpoint buckets.
//! When per-endpoint limiting is enabled a caller must satisfy both
//! buckets; the wait is the maximum of the two deficits.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// A single token bucket.
///
/// Invariant: tokens ∈ [0, capacity]; refill is monotone in wall time.
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Consume `weight` tokens, or report how long until they exist.
    fn try_take(&self, weight: f64) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= weight {
            state.tokens -= weight;
            Ok(())
        } else {
            let deficit = weight - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// Wait needed before `weight` tokens exist, without consuming.
    fn peek_wait(&self, weight: f64) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= weight {
            Duration::ZERO
        } else {
            let deficit = weight - state.tokens;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }

    /// Return tokens after a partially failed joint acquisition.
    fn refund(&self, weight: f64) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + weight).min(self.capacity);
    }

    fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

/// Rate limiter metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterMetrics {
    pub total_acquired: u64,
    pub total_rejected: u64,
    pub total_wait_ms: u64,
}

/// Token-bucket permission for API calls.
///
/// Thread-safe and shared per exchange.
pub struct RateLimiter {
    global: Bucket,
    per_endpoint: Option<DashMap<String, Arc<Bucket>>>,
    endpoint_capacity: f64,
    endpoint_refill: f64,
    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with `requests_per_second` refill and
    /// `burst_capacity` bucket size. With `per_endpoint`, each named
    /// endpoint additionally gets its own bucket of the same shape.
    pub fn new(requests_per_second: f64, burst_capacity: u32, per_endpoint: bool) -> Self {
        let capacity = f64::from(burst_capacity).max(1.0);
        let refill = requests_per_second.max(0.001);
        Self {
            global: Bucket::new(capacity, refill),
            per_endpoint: per_endpoint.then(DashMap::new),
            endpoint_capacity: capacity,
            endpoint_refill: refill,
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Block until `weight` tokens are available and consume them.
    pub async fn acquire(&self, endpoint: Option<&str>, weight: u32) {
        let weight = f64::from(weight.max(1));
        let endpoint_bucket = self.endpoint_bucket(endpoint);

        loop {
            let global_wait = self.global.peek_wait(weight);
            let endpoint_wait = endpoint_bucket
                .as_ref()
                .map(|b| b.peek_wait(weight))
                .unwrap_or(Duration::ZERO);
            let wait = global_wait.max(endpoint_wait);

            if wait.is_zero() {
                if self.take_both(&endpoint_bucket, weight) {
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                // Lost the race to another caller; re-evaluate.
                continue;
            }

            trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            trader_telemetry::metrics::RATE_LIMIT_WAIT_MS.inc_by(wait.as_millis() as f64);
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume `weight` tokens if immediately available.
    pub fn try_acquire(&self, endpoint: Option<&str>, weight: u32) -> bool {
        let weight = f64::from(weight.max(1));
        let endpoint_bucket = self.endpoint_bucket(endpoint);
        if self.take_both(&endpoint_bucket, weight) {
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Consume from both buckets or neither.
    fn take_both(&self, endpoint_bucket: &Option<Arc<Bucket>>, weight: f64) -> bool {
        if self.global.try_take(weight).is_err() {
            return false;
        }
        if let Some(bucket) = endpoint_bucket {
            if bucket.try_take(weight).is_err() {
                self.global.refund(weight);
                return false;
            }
        }
        true
    }

    fn endpoint_bucket(&self, endpoint: Option<&str>) -> Option<Arc<Bucket>> {
        let buckets = self.per_endpoint.as_ref()?;
        let endpoint = endpoint?;
        Some(
            buckets
                .entry(endpoint.to_string())
                .or_insert_with(|| {
                    Arc::new(Bucket::new(self.endpoint_capacity, self.endpoint_refill))
                })
                .clone(),
        )
    }

    /// Tokens currently available in the global bucket.
    pub fn available(&self) -> f64 {
        self.global.available()
    }

    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
        }
    }
}
