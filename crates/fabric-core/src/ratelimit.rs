//! In-process token-bucket rate limiting, keyed by `"<class>:<identity>"`.
//!
//! State lives entirely in memory and is lost on restart — that's accepted
//! by design, not a gap. Each bucket is guarded by its own `tokio::Mutex` so
//! independent keys never contend; the outer map is an `RwLock` so the
//! common case (key already exists) only needs a read lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, RwLock};
use tracing::info;

/// Identity classes a rate limit can be keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitClass {
    AuthFailure,
    Request,
    BundleUpload,
    HealthCheck,
}

impl RateLimitClass {
    /// The string used in the bucket key (`"<class>:<identity>"`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::Request => "request",
            Self::BundleUpload => "bundle_upload",
            Self::HealthCheck => "health_check",
        }
    }

    /// Default capacity (requests per minute; burst equals capacity).
    #[must_use]
    pub const fn default_capacity(self) -> u32 {
        match self {
            Self::AuthFailure => 10,
            Self::Request => 100,
            Self::BundleUpload => 10,
            Self::HealthCheck => 30,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Refill by elapsed time, then attempt to spend one token.
    fn check(&mut self) -> Decision {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Allowed
        } else {
            let deficit = 1.0 - self.tokens;
            let seconds = (deficit / self.refill_rate).ceil().max(1.0);
            Decision::Denied {
                retry_after: Duration::from_secs_f64(seconds),
            }
        }
    }

    fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_refill)
    }
}

/// Per-class capacity overrides. Defaults to [`RateLimitClass::default_capacity`]
/// for any class not explicitly overridden.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub overrides: HashMap<&'static str, u32>,
}

impl RateLimitConfig {
    fn capacity_for(&self, class: RateLimitClass) -> u32 {
        self.overrides
            .get(class.label())
            .copied()
            .unwrap_or_else(|| class.default_capacity())
    }
}

/// A sharded map of token buckets, one per `"<class>:<identity>"` key.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Mutex<Bucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket_key(class: RateLimitClass, identity: &str) -> String {
        format!("{}:{identity}", class.label())
    }

    /// Check and, if allowed, spend one token for `(class, identity)`.
    pub async fn check(&self, class: RateLimitClass, identity: &str) -> Decision {
        let key = Self::bucket_key(class, identity);

        // Fast path: bucket already exists.
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(&key) {
                return bucket.lock().await.check();
            }
        }

        // Slow path: insert a fresh bucket. A concurrent evict-then-reinsert
        // race is harmless — the loser just creates the bucket the winner's
        // eviction just removed, at full capacity, which is exactly the
        // documented behavior for a losing eviction race.
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Mutex::new(Bucket::new(self.config.capacity_for(class))));
        bucket.lock().await.check()
    }

    /// Remove buckets idle longer than `idle_threshold`.
    async fn evict_idle(&self, idle_threshold: Duration) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        let mut keep = HashMap::with_capacity(buckets.len());
        for (key, bucket) in buckets.drain() {
            let idle = bucket.lock().await.idle_for();
            if idle < idle_threshold {
                keep.insert(key, bucket);
            }
        }
        *buckets = keep;
        before.saturating_sub(buckets.len())
    }

    /// Background eviction loop. Races against `shutdown` between ticks so
    /// it stops promptly.
    pub async fn run_eviction_task(
        &self,
        interval: Duration,
        idle_threshold: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        info!(?interval, ?idle_threshold, "rate limiter eviction task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle(idle_threshold).await;
                    if evicted > 0 {
                        info!(evicted, "rate limiter evicted idle buckets");
                    }
                }
                _ = shutdown.changed() => {
                    info!("rate limiter eviction task shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_capacity_then_denies() {
        let mut overrides = HashMap::new();
        overrides.insert(RateLimitClass::Request.label(), 3);
        let limiter = RateLimiter::new(RateLimitConfig { overrides });

        for _ in 0..3 {
            assert_eq!(
                limiter.check(RateLimitClass::Request, "node-a").await,
                Decision::Allowed
            );
        }

        match limiter.check(RateLimitClass::Request, "node-a").await {
            Decision::Denied { retry_after } => {
                assert!(retry_after.as_secs_f64() > 0.0);
            }
            Decision::Allowed => panic!("fourth request should have been denied"),
        }
    }

    #[tokio::test]
    async fn independent_keys_do_not_interact() {
        let mut overrides = HashMap::new();
        overrides.insert(RateLimitClass::Request.label(), 1);
        let limiter = RateLimiter::new(RateLimitConfig { overrides });

        assert_eq!(
            limiter.check(RateLimitClass::Request, "node-a").await,
            Decision::Allowed
        );
        assert_eq!(
            limiter.check(RateLimitClass::Request, "node-b").await,
            Decision::Allowed
        );
    }

    #[tokio::test]
    async fn eviction_removes_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let _ = limiter.check(RateLimitClass::HealthCheck, "1.2.3.4").await;
        assert_eq!(limiter.buckets.read().await.len(), 1);

        let evicted = limiter.evict_idle(Duration::from_secs(0)).await;
        assert_eq!(evicted, 1);
        assert_eq!(limiter.buckets.read().await.len(), 0);
    }
}
