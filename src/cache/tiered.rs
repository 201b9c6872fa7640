//! Two-tier cache: a hot DashMap in front of an optional durable store.
//!
//! Reads go memory → durable; a valid durable hit is promoted into memory.
//! Writes go to both tiers. Concurrent writers simply overwrite each other
//! and the two tiers are allowed to disagree briefly.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::DurableStore;
use super::{CacheEntry, CacheService, CacheStats};
use crate::error::{AppError, AppResult};
use crate::scheduler::{RunGuard, ScheduledTask};

pub struct TieredCache<V> {
    namespace: String,
    memory: DashMap<String, CacheEntry<V>>,
    /// Taken on destroy
    durable: RwLock<Option<Arc<dyn DurableStore>>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeping: AtomicBool,
    destroyed: AtomicBool,
    sweeper: Mutex<Option<ScheduledTask>>,
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Memory-only cache
    pub fn in_memory(namespace: impl Into<String>, default_ttl: Duration) -> Self {
        Self::build(namespace.into(), None, default_ttl)
    }

    fn build(
        namespace: String,
        durable: Option<Arc<dyn DurableStore>>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            namespace,
            memory: DashMap::new(),
            durable: RwLock::new(durable),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeping: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    /// Two-tier cache; still-valid durable entries are loaded into memory
    pub async fn open(
        namespace: impl Into<String>,
        durable: Arc<dyn DurableStore>,
        default_ttl: Duration,
    ) -> AppResult<Self> {
        let cache = Self::build(namespace.into(), Some(durable), default_ttl);
        let loaded = cache.load_from_durable().await?;
        info!(namespace = %cache.namespace, loaded, "Cache opened");
        Ok(cache)
    }

    fn durable(&self) -> Option<Arc<dyn DurableStore>> {
        self.durable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}/{}", self.namespace, key)
    }

    fn prefix(&self) -> String {
        format!("{}/", self.namespace)
    }

    fn ensure_alive(&self) -> AppResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(AppError::service(
                "CACHE_DESTROYED",
                format!("cache '{}' has been destroyed", self.namespace),
            ));
        }
        Ok(())
    }

    async fn read_durable(
        &self,
        store: &dyn DurableStore,
        key: &str,
    ) -> AppResult<Option<CacheEntry<V>>> {
        match store.get(&self.durable_key(key)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_from_durable(&self) -> AppResult<usize> {
        let Some(store) = self.durable() else {
            return Ok(0);
        };

        let now = Utc::now();
        let prefix = self.prefix();
        let mut loaded = 0;
        for full_key in store.keys(&prefix).await? {
            let key = &full_key[prefix.len()..];
            match self.read_durable(store.as_ref(), key).await {
                Ok(Some(entry)) if !entry.is_expired_at(now) => {
                    self.memory.insert(key.to_string(), entry);
                    loaded += 1;
                }
                Ok(_) => store.remove(&full_key).await?,
                Err(e) => {
                    warn!(key, error = %e, "Dropping unreadable durable cache entry");
                    store.remove(&full_key).await?;
                }
            }
        }
        Ok(loaded)
    }

    /// Drop expired entries from both tiers.
    ///
    /// Returns immediately with 0 when a sweep is already running.
    pub async fn cleanup_expired(&self) -> AppResult<usize> {
        let Some(_guard) = RunGuard::try_acquire(&self.sweeping) else {
            debug!(namespace = %self.namespace, "Sweep already in progress");
            return Ok(0);
        };
        self.sweep().await
    }

    async fn sweep(&self) -> AppResult<usize> {
        let now = Utc::now();
        let mut removed_keys = HashSet::new();
        self.memory.retain(|key, entry| {
            let expired = entry.is_expired_at(now);
            if expired {
                removed_keys.insert(key.clone());
            }
            !expired
        });

        if let Some(store) = self.durable() {
            let prefix = self.prefix();
            for full_key in store.keys(&prefix).await? {
                let key = &full_key[prefix.len()..];
                let expired = match self.read_durable(store.as_ref(), key).await {
                    Ok(Some(entry)) => entry.is_expired_at(now),
                    Ok(None) => false,
                    Err(_) => true,
                };
                if expired {
                    store.remove(&full_key).await?;
                    removed_keys.insert(key.to_string());
                }
            }
        }

        let removed = removed_keys.len();
        if removed > 0 {
            debug!(namespace = %self.namespace, removed, "Swept expired cache entries");
        }
        Ok(removed)
    }

    /// Start the periodic sweep. Replaces a previously started sweep.
    pub async fn start_cleanup(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = ScheduledTask::spawn(
            format!("cache-sweep:{}", self.namespace),
            every,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(cache) = weak.upgrade() {
                        if let Err(e) = cache.cleanup_expired().await {
                            warn!(error = %e, "Cache sweep failed");
                        }
                    }
                }
            },
        );

        if let Some(previous) = self.sweeper.lock().await.replace(task) {
            previous.shutdown().await;
        }
    }

    /// Stop the sweep and release the durable tier.
    ///
    /// Must be called on teardown; nothing runs this implicitly.
    pub async fn destroy(&self) -> AppResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(task) = self.sweeper.lock().await.take() {
            task.shutdown().await;
        }
        let store = self
            .durable
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(store) = store {
            store.flush().await?;
        }
        self.memory.clear();
        info!(namespace = %self.namespace, "Cache destroyed");
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[async_trait]
impl<V> CacheService<V> for TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_entry(&self, key: &str) -> AppResult<Option<CacheEntry<V>>> {
        self.ensure_alive()?;
        let now = Utc::now();

        let hot = self.memory.get(key).map(|e| e.value().clone());
        match hot {
            Some(entry) if !entry.is_expired_at(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry));
            }
            Some(_) => {
                self.memory.remove(key);
            }
            None => {}
        }

        if let Some(store) = self.durable() {
            if let Some(entry) = self.read_durable(store.as_ref(), key).await? {
                if !entry.is_expired_at(now) {
                    self.memory.insert(key.to_string(), entry.clone());
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry));
                }
                store.remove(&self.durable_key(key)).await?;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> AppResult<()> {
        self.ensure_alive()?;
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        if let Some(store) = self.durable() {
            store
                .put(&self.durable_key(key), serde_json::to_vec(&entry)?)
                .await?;
        }
        self.memory.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.ensure_alive()?;
        let mut existed = self.memory.remove(key).is_some();
        if let Some(store) = self.durable() {
            let full_key = self.durable_key(key);
            existed |= store.get(&full_key).await?.is_some();
            store.remove(&full_key).await?;
        }
        Ok(existed)
    }

    async fn invalidate(&self, pattern: &str) -> AppResult<usize> {
        self.ensure_alive()?;
        let mut removed_keys = HashSet::new();
        self.memory.retain(|key, _| {
            let hit = key.contains(pattern);
            if hit {
                removed_keys.insert(key.clone());
            }
            !hit
        });

        if let Some(store) = self.durable() {
            let prefix = self.prefix();
            for full_key in store.keys(&prefix).await? {
                let key = &full_key[prefix.len()..];
                if key.contains(pattern) {
                    store.remove(&full_key).await?;
                    removed_keys.insert(key.to_string());
                }
            }
        }

        let removed = removed_keys.len();
        debug!(namespace = %self.namespace, pattern, removed, "Invalidated cache entries");
        Ok(removed)
    }

    async fn clear(&self) -> AppResult<()> {
        self.ensure_alive()?;
        self.memory.clear();
        if let Some(store) = self.durable() {
            for full_key in store.keys(&self.prefix()).await? {
                store.remove(&full_key).await?;
            }
        }
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.memory.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;

    fn memory_cache() -> TieredCache<String> {
        TieredCache::in_memory("test", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_set_get_and_expire() {
        let cache = memory_cache();
        cache
            .set("k", "v".to_string(), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_substring() {
        let cache = memory_cache();
        for key in ["price:ETH:USD", "price:BTC:USD", "balance:ethereum:0x1"] {
            cache.set(key, key.to_string(), None).await.unwrap();
        }

        let removed = cache.invalidate("ETH").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get("price:ETH:USD").await.unwrap(), None);
        assert!(cache.get("price:BTC:USD").await.unwrap().is_some());
        assert!(cache.get("balance:ethereum:0x1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_durable_tier_promotes_on_miss() {
        let store = Arc::new(MemoryStore::new());
        let writer: TieredCache<String> =
            TieredCache::open("prices", store.clone(), Duration::from_secs(60))
                .await
                .unwrap();
        writer.set("price:ETH:USD", "3000".into(), None).await.unwrap();
        assert_eq!(store.len(), 1);

        // A second process starts with a warm hot tier loaded from disk
        let reader: TieredCache<String> =
            TieredCache::open("prices", store.clone(), Duration::from_secs(60))
                .await
                .unwrap();
        assert_eq!(reader.stats().size, 1);

        // Hot miss falls through to the durable tier and promotes
        reader.memory.clear();
        assert_eq!(
            reader.get("price:ETH:USD").await.unwrap(),
            Some("3000".to_string())
        );
        assert_eq!(reader.stats().size, 1);
        assert_eq!(reader.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_open_skips_and_evicts_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache: TieredCache<u32> = TieredCache::open("c", store.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.set("short", 1, Some(Duration::from_millis(1))).await.unwrap();
        cache.set("long", 2, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reopened: TieredCache<u32> =
            TieredCache::open("c", store.clone(), Duration::from_secs(60))
                .await
                .unwrap();
        assert_eq!(reopened.stats().size, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache: TieredCache<u32> = TieredCache::open("c", store.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.set("a", 1, Some(Duration::from_millis(1))).await.unwrap();
        cache.set("b", 2, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().size, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_sweep_runs_without_traffic() {
        let store = Arc::new(MemoryStore::new());
        let cache: Arc<TieredCache<u32>> = Arc::new(
            TieredCache::open("c", store.clone(), Duration::from_secs(60))
                .await
                .unwrap(),
        );
        cache.set("short", 1, Some(Duration::from_millis(10))).await.unwrap();
        assert_eq!(store.len(), 1);

        cache.start_cleanup(Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // No reads in between: only the timer could have removed it
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().misses, 0);
        assert_eq!(store.len(), 0);
        cache.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_guard_released_after_cancelled_run() {
        let cache = memory_cache();
        cache
            .set("k", "v".into(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let held = RunGuard::try_acquire(&cache.sweeping);
        assert_eq!(cache.cleanup_expired().await.unwrap(), 0);
        drop(held);
        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_destroy_releases_durable_store() {
        let store = Arc::new(MemoryStore::new());
        let cache: TieredCache<u32> = TieredCache::open("c", store.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.set("a", 1, None).await.unwrap();
        assert_eq!(Arc::strong_count(&store), 2);

        cache.destroy().await.unwrap();
        assert_eq!(Arc::strong_count(&store), 1);
        // Entries stay on disk for the next open
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_stops_sweep_and_rejects_use() {
        let cache = Arc::new(memory_cache());
        cache.start_cleanup(Duration::from_secs(1)).await;
        cache.destroy().await.unwrap();

        let err = cache.get("k").await.unwrap_err();
        assert_eq!(err.code(), "CACHE_DESTROYED");
        assert!(cache.set("k", "v".into(), None).await.is_err());
        // Idempotent
        cache.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_variants() {
        let cache = memory_cache();
        cache
            .set_many(
                vec![("a".into(), "1".into()), ("b".into(), "2".into())],
                None,
            )
            .await
            .unwrap();
        let found = cache
            .get_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("b"), Some(&"2".to_string()));

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().size, 0);
    }
}
