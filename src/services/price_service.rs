//! Price Fetch Service
//!
//! Multi-provider price lookup with a cache cascade.
//!
//! # Cascade for a single price
//! 1. Cached price, when the request prefers cache and it is fresh enough
//! 2. Unexpired fallback price, returned at once and queued for refresh
//! 3. Providers in priority order, first success wins
//! 4. Stale cached price, re-stamped with [`Price::refresh`]
//! 5. Stale fallback price, re-stamped the same way
//! 6. Unavailable
//!
//! The fallback map is always resident: entries are only ever replaced,
//! never evicted, though each one still expires by its own TTL.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::retry::with_timeout;
use crate::cache::{CacheService, price_key};
use crate::error::{AppError, AppResult};
use crate::price::{Price, PriceSource};
use crate::provider::PriceProvider;
use crate::scheduler::{RunGuard, ScheduledTask};

#[derive(Debug, Clone)]
pub struct PriceServiceConfig {
    /// Symbols per provider batch call
    pub batch_size: usize,
    pub refresh_interval: Duration,
    /// Default for [`PriceRequest::max_cache_age`]
    pub max_cache_age: Duration,
    pub provider_timeout: Duration,
    /// How long fetched prices stay in the cache tier
    pub cache_ttl: Duration,
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            refresh_interval: Duration::from_secs(30),
            max_cache_age: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriceRequest {
    pub symbol: String,
    pub currency: String,
    pub prefer_cache: bool,
    pub max_cache_age: Option<Duration>,
}

impl PriceRequest {
    pub fn new(symbol: &str, currency: &str) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            currency: currency.trim().to_uppercase(),
            prefer_cache: true,
            max_cache_age: None,
        }
    }

    pub fn skip_cache(mut self) -> Self {
        self.prefer_cache = false;
        self
    }

    pub fn with_max_cache_age(mut self, age: Duration) -> Self {
        self.max_cache_age = Some(age);
        self
    }
}

pub struct PriceService {
    /// Sorted by ascending priority
    providers: RwLock<Vec<Arc<dyn PriceProvider>>>,
    cache: Arc<dyn CacheService<Price>>,
    fallback: DashMap<String, Price>,
    /// Pending background refreshes, keyed by cache key
    refresh_queue: DashMap<String, (String, String)>,
    refreshing: AtomicBool,
    config: PriceServiceConfig,
}

impl PriceService {
    pub fn new(cache: Arc<dyn CacheService<Price>>, config: PriceServiceConfig) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            cache,
            fallback: DashMap::new(),
            refresh_queue: DashMap::new(),
            refreshing: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &PriceServiceConfig {
        &self.config
    }

    // ============================================================
    // PROVIDER REGISTRY
    // ============================================================

    /// Add a provider; one with the same name is replaced
    pub async fn register_provider(&self, provider: Arc<dyn PriceProvider>) {
        let mut providers = self.providers.write().await;
        providers.retain(|p| p.name() != provider.name());
        info!(
            provider = provider.name(),
            priority = provider.priority(),
            "Registered price provider"
        );
        providers.push(provider);
        providers.sort_by_key(|p| p.priority());
    }

    pub async fn remove_provider(&self, name: &str) -> bool {
        let mut providers = self.providers.write().await;
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        providers.len() != before
    }

    /// Provider names in the order they are tried
    pub async fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    async fn provider_snapshot(&self) -> Vec<Arc<dyn PriceProvider>> {
        self.providers.read().await.clone()
    }

    // ============================================================
    // SINGLE PRICE
    // ============================================================

    pub async fn fetch_price(&self, request: &PriceRequest) -> AppResult<Price> {
        let key = price_key(&request.symbol, &request.currency);
        let max_age = request.max_cache_age.unwrap_or(self.config.max_cache_age);

        let cached = self.cache.get(&key).await?;
        if request.prefer_cache {
            if let Some(price) = &cached {
                if !price.is_expired() && price.age() <= max_age {
                    debug!(key = %key, "Price served from cache");
                    return Ok(price.clone());
                }
            }
        }

        let fallback = self.fallback_price(&request.symbol, &request.currency);
        if let Some(price) = &fallback {
            if !price.is_expired() {
                if price.source() != PriceSource::Manual {
                    self.queue_refresh(&request.symbol, &request.currency);
                }
                debug!(key = %key, source = %price.source(), "Price served from fallback");
                return Ok(price.clone());
            }
        }

        match self
            .fetch_from_providers(&request.symbol, &request.currency)
            .await
        {
            Ok(price) => {
                self.store(&key, &price).await?;
                Ok(price)
            }
            Err(e) => {
                if let Some(price) = cached {
                    warn!(key = %key, error = %e, "Providers failed, serving stale cached price");
                    return Ok(price.refresh());
                }
                if let Some(price) = fallback {
                    warn!(key = %key, error = %e, "Providers failed, serving stale fallback price");
                    return Ok(price.refresh());
                }
                Err(e)
            }
        }
    }

    /// Try providers in priority order; first success wins
    async fn fetch_from_providers(&self, symbol: &str, currency: &str) -> AppResult<Price> {
        let providers = self.provider_snapshot().await;
        if providers.is_empty() {
            return Err(AppError::service(
                "PRICE_UNAVAILABLE",
                format!("no price providers registered for {symbol}/{currency}"),
            ));
        }

        let mut errors = Vec::new();
        for provider in providers {
            let result = with_timeout(
                self.config.provider_timeout,
                "fetch_price",
                provider.fetch_price(symbol, currency),
            )
            .await;
            match result {
                Ok(price) => {
                    debug!(symbol, currency, provider = provider.name(), "Price fetched");
                    return Ok(price);
                }
                Err(e) => {
                    warn!(symbol, provider = provider.name(), error = %e, "Price provider failed");
                    errors.push(e);
                }
            }
        }

        Err(AppError::Aggregate {
            message: format!("all price providers failed for {symbol}/{currency}"),
            errors,
        })
    }

    /// Writes to the cache and fallback map. A manual price is only ever
    /// replaced by another manual price.
    async fn store(&self, key: &str, price: &Price) -> AppResult<()> {
        if price.source() != PriceSource::Manual && self.pinned_price(key).is_some() {
            debug!(key = %key, "Manual price pinned, provider quote ignored");
            return Ok(());
        }
        self.cache
            .set(key, price.clone(), Some(self.config.cache_ttl))
            .await?;
        self.fallback.insert(key.to_string(), price.clone());
        Ok(())
    }

    // ============================================================
    // BATCH
    // ============================================================

    /// Prices for `symbols`, keyed by upper-case symbol. Symbols no source
    /// could price are absent from the map.
    pub async fn fetch_batch_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> AppResult<HashMap<String, Price>> {
        let currency = currency.trim().to_uppercase();
        let mut resolved = HashMap::new();
        let mut misses: Vec<String> = Vec::new();

        for symbol in symbols {
            let symbol = symbol.trim().to_uppercase();
            if resolved.contains_key(&symbol) || misses.contains(&symbol) {
                continue;
            }
            let key = price_key(&symbol, &currency);
            if let Some(price) = self.pinned_price(&key) {
                resolved.insert(symbol, price);
                continue;
            }
            match self.cache.get(&key).await? {
                Some(price) if !price.is_expired() => {
                    resolved.insert(symbol, price);
                }
                _ => misses.push(symbol),
            }
        }

        let hits = resolved.len();
        let providers = self.provider_snapshot().await;
        for chunk in misses.chunks(self.config.batch_size.max(1)) {
            let mut pending: Vec<String> = chunk.to_vec();
            for provider in &providers {
                if pending.is_empty() {
                    break;
                }
                let result = with_timeout(
                    self.config.provider_timeout,
                    "fetch_batch_prices",
                    provider.fetch_batch_prices(&pending, &currency),
                )
                .await;
                let found = match result {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(provider = provider.name(), error = %e, "Batch price provider failed");
                        continue;
                    }
                };
                for (symbol, price) in found {
                    let symbol = symbol.to_uppercase();
                    if let Some(pos) = pending.iter().position(|s| *s == symbol) {
                        pending.swap_remove(pos);
                        self.store(&price_key(&symbol, &currency), &price).await?;
                        resolved.insert(symbol, price);
                    }
                }
            }
            if !pending.is_empty() {
                debug!(unresolved = ?pending, "Batch left symbols unpriced");
            }
        }

        info!(
            requested = symbols.len(),
            cache_hits = hits,
            resolved = resolved.len(),
            "Batch price fetch finished"
        );
        Ok(resolved)
    }

    // ============================================================
    // FALLBACK AND MANUAL PRICES
    // ============================================================

    pub fn fallback_price(&self, symbol: &str, currency: &str) -> Option<Price> {
        self.fallback
            .get(&price_key(symbol, currency))
            .map(|p| p.value().clone())
    }

    fn pinned_price(&self, key: &str) -> Option<Price> {
        self.fallback
            .get(key)
            .filter(|p| p.source() == PriceSource::Manual && !p.is_expired())
            .map(|p| p.value().clone())
    }

    /// Pin a price without consulting providers. Manual prices never
    /// expire and are not replaced by background refresh.
    pub async fn set_manual_price(
        &self,
        symbol: &str,
        currency: &str,
        amount: f64,
    ) -> AppResult<Price> {
        let price = Price::manual(amount, currency)?;
        let key = price_key(symbol, currency);
        self.store(&key, &price).await?;
        self.refresh_queue.remove(&key);
        info!(key = %key, amount, "Manual price set");
        Ok(price)
    }

    // ============================================================
    // BACKGROUND REFRESH
    // ============================================================

    fn queue_refresh(&self, symbol: &str, currency: &str) {
        let key = price_key(symbol, currency);
        self.refresh_queue
            .entry(key)
            .or_insert_with(|| (symbol.trim().to_uppercase(), currency.trim().to_uppercase()));
    }

    /// Cache keys waiting for a background refresh, sorted
    pub fn queued_refreshes(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.refresh_queue.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Drain the refresh queue once. Returns how many prices were refreshed,
    /// or 0 immediately when another run is in progress.
    pub async fn process_refresh_queue(&self) -> usize {
        let Some(_guard) = RunGuard::try_acquire(&self.refreshing) else {
            debug!("Price refresh already in progress");
            return 0;
        };

        let keys: Vec<String> = self.refresh_queue.iter().map(|e| e.key().clone()).collect();
        let mut refreshed = 0;
        for key in keys {
            let Some((_, (symbol, currency))) = self.refresh_queue.remove(&key) else {
                continue;
            };
            let result = match self.fetch_from_providers(&symbol, &currency).await {
                Ok(price) => self.store(&key, &price).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => refreshed += 1,
                Err(e) => warn!(key = %key, error = %e, "Background price refresh failed"),
            }
        }

        if refreshed > 0 {
            debug!(refreshed, "Background price refresh finished");
        }
        refreshed
    }

    /// Drain the refresh queue every `refresh_interval` until the returned
    /// task is shut down or dropped.
    pub fn start_background_refresh(self: &Arc<Self>) -> ScheduledTask {
        let weak: Weak<Self> = Arc::downgrade(self);
        ScheduledTask::spawn("price-refresh", self.config.refresh_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(service) = weak.upgrade() {
                    service.process_refresh_queue().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::cache::mock::CountingCache;
    use crate::price::PriceQuality;
    use crate::provider::mock::MockPriceProvider;
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::Ordering;

    fn memory_cache() -> Arc<TieredCache<Price>> {
        Arc::new(TieredCache::in_memory("prices", Duration::from_secs(300)))
    }

    fn old_live(amount: f64, secs: i64) -> Price {
        Price::live(amount, "USD", Some("old"), 95)
            .unwrap()
            .with_timestamp(Utc::now() - TimeDelta::seconds(secs))
    }

    #[tokio::test]
    async fn test_priority_failover_caches_once() {
        let cache = Arc::new(CountingCache::<Price>::new(Duration::from_secs(300)));
        let service = PriceService::new(cache.clone(), PriceServiceConfig::default());

        let primary = Arc::new(MockPriceProvider::new("primary", 1));
        primary.set_failing(true);
        let secondary = Arc::new(MockPriceProvider::new("secondary", 2).with_price("BTC", 50000.0));
        // Registration order does not matter
        service.register_provider(secondary.clone()).await;
        service.register_provider(primary.clone()).await;
        assert_eq!(service.provider_names().await, vec!["primary", "secondary"]);

        let price = service
            .fetch_price(&PriceRequest::new("btc", "usd"))
            .await
            .unwrap();
        assert_eq!(price.amount(), 50000.0);
        assert_eq!(price.provider(), Some("secondary"));
        assert_eq!(cache.set_calls(), 1);
        assert_eq!(primary.single_calls(), 1);
    }

    #[tokio::test]
    async fn test_prefer_cache_skips_providers() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        let provider = Arc::new(MockPriceProvider::new("p", 1).with_price("ETH", 3000.0));
        service.register_provider(provider.clone()).await;

        let request = PriceRequest::new("ETH", "USD").skip_cache();
        service.fetch_price(&request).await.unwrap();
        service.fallback.clear();

        let again = service
            .fetch_price(&PriceRequest::new("ETH", "USD"))
            .await
            .unwrap();
        assert_eq!(again.amount(), 3000.0);
        assert_eq!(provider.single_calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_served_and_queued() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        let provider = Arc::new(MockPriceProvider::new("p", 1).with_price("ETH", 3100.0));
        service.register_provider(provider.clone()).await;
        service.fallback.insert(
            price_key("ETH", "USD"),
            Price::fallback(2900.0, "USD", Some("seed"), 60).unwrap(),
        );

        let price = service
            .fetch_price(&PriceRequest::new("ETH", "USD"))
            .await
            .unwrap();
        assert_eq!(price.amount(), 2900.0);
        assert_eq!(provider.single_calls(), 0);
        assert_eq!(service.queued_refreshes(), vec!["price:ETH:USD".to_string()]);

        assert_eq!(service.process_refresh_queue().await, 1);
        assert!(service.queued_refreshes().is_empty());
        assert_eq!(service.fallback_price("ETH", "USD").unwrap().amount(), 3100.0);
    }

    #[tokio::test]
    async fn test_stale_cached_price_when_providers_fail() {
        let cache = memory_cache();
        cache
            .set(&price_key("ETH", "USD"), old_live(2800.0, 30), None)
            .await
            .unwrap();
        let service = PriceService::new(cache, PriceServiceConfig::default());
        let provider = Arc::new(MockPriceProvider::new("p", 1));
        provider.set_failing(true);
        service.register_provider(provider).await;

        let price = service
            .fetch_price(&PriceRequest::new("ETH", "USD"))
            .await
            .unwrap();
        assert_eq!(price.amount(), 2800.0);
        assert_eq!(price.source(), PriceSource::Cached);
        assert_eq!(price.confidence(), 75);
        assert!(price.age() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stale_fallback_when_nothing_cached() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        service
            .fallback
            .insert(price_key("SOL", "USD"), old_live(150.0, 600));

        // No providers at all
        let price = service
            .fetch_price(&PriceRequest::new("SOL", "USD"))
            .await
            .unwrap();
        assert_eq!(price.amount(), 150.0);
        assert_eq!(price.source(), PriceSource::Cached);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        let err = service
            .fetch_price(&PriceRequest::new("XYZ", "USD"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PRICE_UNAVAILABLE");

        let provider = Arc::new(MockPriceProvider::new("p", 1));
        service.register_provider(provider).await;
        let err = service
            .fetch_price(&PriceRequest::new("XYZ", "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Aggregate { ref errors, .. } if errors.len() == 1));
    }

    #[tokio::test]
    async fn test_manual_price_bypasses_providers() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        let provider = Arc::new(MockPriceProvider::new("p", 1).with_price("USDC", 0.99));
        service.register_provider(provider.clone()).await;

        service.set_manual_price("usdc", "usd", 1.0).await.unwrap();
        let price = service
            .fetch_price(&PriceRequest::new("USDC", "USD").skip_cache())
            .await
            .unwrap();
        assert_eq!(price.amount(), 1.0);
        assert_eq!(price.quality(), PriceQuality::High);
        assert_eq!(provider.single_calls(), 0);
        assert!(service.queued_refreshes().is_empty());
    }

    #[tokio::test]
    async fn test_manual_price_outlives_its_cache_entry() {
        let config = PriceServiceConfig {
            cache_ttl: Duration::from_millis(50),
            ..Default::default()
        };
        let service = PriceService::new(memory_cache(), config);
        let provider = Arc::new(MockPriceProvider::new("p", 1).with_price("USDC", 0.97));
        service.register_provider(provider.clone()).await;

        service.set_manual_price("USDC", "USD", 1.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let prices = service
            .fetch_batch_prices(&["usdc".to_string()], "USD")
            .await
            .unwrap();
        assert_eq!(prices["USDC"].amount(), 1.0);
        assert_eq!(prices["USDC"].source(), PriceSource::Manual);
        assert_eq!(provider.batch_calls(), 0);

        // A provider quote arriving by any path leaves the pin alone
        let quote = Price::live(0.97, "USD", Some("p"), 95).unwrap();
        service.store(&price_key("USDC", "USD"), &quote).await.unwrap();
        let pinned = service.fallback_price("USDC", "USD").unwrap();
        assert_eq!(pinned.source(), PriceSource::Manual);

        let single = service
            .fetch_price(&PriceRequest::new("USDC", "USD"))
            .await
            .unwrap();
        assert_eq!(single.amount(), 1.0);
        assert_eq!(provider.single_calls(), 0);

        // A new manual price still replaces the old one
        service.set_manual_price("USDC", "USD", 0.999).await.unwrap();
        assert_eq!(service.fallback_price("USDC", "USD").unwrap().amount(), 0.999);
    }

    #[tokio::test]
    async fn test_batch_chunks_and_falls_through_providers() {
        let cache = memory_cache();
        cache
            .set(
                &price_key("ETH", "USD"),
                Price::live(3000.0, "USD", Some("c"), 95).unwrap(),
                None,
            )
            .await
            .unwrap();
        let config = PriceServiceConfig {
            batch_size: 2,
            ..Default::default()
        };
        let service = PriceService::new(cache, config);

        let first = Arc::new(
            MockPriceProvider::new("first", 1)
                .with_price("BTC", 60000.0)
                .with_price("SOL", 150.0),
        );
        let second = Arc::new(
            MockPriceProvider::new("second", 2)
                .with_price("LINK", 15.0)
                .with_price("BTC", 1.0),
        );
        service.register_provider(first.clone()).await;
        service.register_provider(second.clone()).await;

        let symbols: Vec<String> = ["eth", "btc", "sol", "link", "dot", "btc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let prices = service.fetch_batch_prices(&symbols, "usd").await.unwrap();

        assert_eq!(prices.len(), 4);
        assert_eq!(prices["ETH"].provider(), Some("c"));
        assert_eq!(prices["BTC"].amount(), 60000.0);
        assert_eq!(prices["LINK"].provider(), Some("second"));
        assert!(!prices.contains_key("DOT"));
        // misses BTC SOL LINK DOT in chunks of two
        assert_eq!(first.batch_calls(), 2);
        assert_eq!(second.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_is_single_flight() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        service.queue_refresh("ETH", "USD");
        service.refreshing.store(true, Ordering::SeqCst);
        assert_eq!(service.process_refresh_queue().await, 0);
        assert_eq!(service.queued_refreshes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_refresh_does_not_block_next_run() {
        let service = PriceService::new(memory_cache(), PriceServiceConfig::default());
        let provider = Arc::new(
            MockPriceProvider::new("p", 1)
                .with_price("ETH", 3000.0)
                .with_price("BTC", 60000.0),
        );
        provider.set_delay(Duration::from_secs(2));
        service.register_provider(provider.clone()).await;

        service.queue_refresh("ETH", "USD");
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), service.process_refresh_queue()).await;
        assert!(cancelled.is_err());

        provider.set_delay(Duration::ZERO);
        service.queue_refresh("BTC", "USD");
        assert_eq!(service.process_refresh_queue().await, 1);
        assert!(service.queued_refreshes().is_empty());
        assert_eq!(service.fallback_price("BTC", "USD").unwrap().amount(), 60000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_drains_queue() {
        let service = Arc::new(PriceService::new(memory_cache(), PriceServiceConfig::default()));
        let provider = Arc::new(MockPriceProvider::new("p", 1).with_price("ETH", 3200.0));
        service.register_provider(provider.clone()).await;
        service.queue_refresh("ETH", "USD");

        let task = service.start_background_refresh();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(service.queued_refreshes().is_empty());
        assert_eq!(provider.single_calls(), 1);
        task.shutdown().await;
    }
}
