//! Fixed-window rate limiter with a shared counter store.
//!
//! Admission re-checks the counter value returned by the atomic increment,
//! so concurrent callers racing on the same window cannot admit more than
//! the limit. Counter store failures fail open: availability over strict
//! enforcement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::LimitError;

/// Shared counter store behind the limiter.
///
/// `incr_with_expiry` must be atomic: create-with-1 or increment in one
/// step, returning the post-increment value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value for a key, 0 if absent or expired.
    async fn get(&self, key: &str) -> Result<u64, LimitError>;

    /// Atomically increment a key, setting `ttl` when the key is created.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, LimitError>;
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-memory counter store.
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<u64, LimitError> {
        let mut counters = self.counters.lock().await;
        match counters.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.count),
            Some(_) => {
                counters.remove(key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, LimitError> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        let entry = counters.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + ttl;
        }
        entry.count += 1;
        Ok(entry.count)
    }
}

/// Fixed-window limiter keyed by caller identity.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// Admit or reject a request for `identity` in the current window.
    pub async fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Utc::now()).await
    }

    /// Admission against an explicit clock, for deterministic callers.
    pub async fn allow_at(&self, identity: &str, now: DateTime<Utc>) -> bool {
        let window_secs = self.window.as_secs().max(1) as i64;
        let key = format!("{identity}:{}", now.timestamp().div_euclid(window_secs));

        match self.store.get(&key).await {
            Ok(count) if count >= self.limit => {
                tracing::debug!(identity, count, "Rate limit rejection");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(identity, error = %e, "Counter store unavailable, failing open");
                return true;
            }
        }

        // Expire just under the window so a counter can never bleed into
        // the next window.
        let ttl = self.window.saturating_sub(Duration::from_secs(1));
        match self.store.incr_with_expiry(&key, ttl).await {
            // Post-increment re-check closes the check/increment race.
            Ok(count) => {
                let admitted = count <= self.limit;
                if !admitted {
                    tracing::debug!(identity, count, "Rate limit rejection after increment");
                }
                admitted
            }
            Err(e) => {
                tracing::warn!(identity, error = %e, "Counter store unavailable, failing open");
                true
            }
        }
    }
}
