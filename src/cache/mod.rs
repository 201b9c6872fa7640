//! Caching
//!
//! [`CacheService`] is the contract the fetch services depend on. The only
//! implementation, [`TieredCache`], keeps a hot in-memory tier and, when a
//! [`DurableStore`] is injected, a durable tier behind it.

pub mod keys;
pub mod store;
mod tiered;

pub use keys::{balance_key, price_key};
pub use store::{DurableStore, MemoryStore, SledStore};
pub use tiered::TieredCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::AppResult;

/// A cached value plus the bookkeeping needed to expire it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > self.ttl()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently held in the hot tier
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[async_trait]
pub trait CacheService<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Unexpired entry for `key`, with its age information
    async fn get_entry(&self, key: &str) -> AppResult<Option<CacheEntry<V>>>;

    /// `ttl` of `None` uses the cache's default TTL
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Remove every key containing `pattern`; returns how many were removed
    async fn invalidate(&self, pattern: &str) -> AppResult<usize>;

    async fn clear(&self) -> AppResult<()>;

    fn stats(&self) -> CacheStats;

    async fn get(&self, key: &str) -> AppResult<Option<V>> {
        Ok(self.get_entry(key).await?.map(|e| e.value))
    }

    async fn get_many(&self, keys: &[String]) -> AppResult<HashMap<String, V>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: Vec<(String, V)>, ttl: Option<Duration>) -> AppResult<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new(1u32, Duration::from_millis(50));
        let t = entry.stored_at;
        assert!(!entry.is_expired_at(t + TimeDelta::milliseconds(50)));
        assert!(entry.is_expired_at(t + TimeDelta::milliseconds(51)));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            size: 2,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
