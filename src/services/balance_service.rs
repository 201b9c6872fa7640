//! Balance Fetch Service
//!
//! Cache-first balance lookup over a chain → provider registry.
//!
//! # Flow
//! 1. Resolve the provider for the chain (`PROVIDER_NOT_FOUND` otherwise)
//! 2. Unless forced, serve a native balance cached within the TTL
//! 3. Fetch the native balance, cache it
//! 4. Optionally fetch token balances; failures there are logged and dropped
//!
//! Cache errors are not masked: a failing cache fails the whole fetch.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{RetryPolicy, retry, with_timeout};
use crate::balance::{BalanceAggregate, BalanceMetadata, NewBalance};
use crate::cache::{CacheService, balance_key};
use crate::chain::Chain;
use crate::error::{AppError, AppResult};
use crate::money::AssetValue;
use crate::provider::{BalanceProvider, TokenBalance};

#[derive(Debug, Clone)]
pub struct BalanceServiceConfig {
    /// Cached balances younger than this are served without a provider call
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    /// Requests in flight at once during a batch fetch
    pub batch_size: usize,
    pub provider_timeout: Duration,
    /// Used when a request leaves `include_tokens` unset
    pub include_tokens: bool,
}

impl Default for BalanceServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            batch_size: 5,
            provider_timeout: Duration::from_secs(10),
            include_tokens: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalanceRequest {
    pub account_id: String,
    pub address: String,
    pub chain: Chain,
    pub include_tokens: Option<bool>,
    pub force_refresh: bool,
}

impl BalanceRequest {
    pub fn new(account_id: impl Into<String>, address: impl Into<String>, chain: Chain) -> Self {
        Self {
            account_id: account_id.into(),
            address: address.into(),
            chain,
            include_tokens: None,
            force_refresh: false,
        }
    }

    pub fn with_tokens(mut self, include: bool) -> Self {
        self.include_tokens = Some(include);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BalanceFetchResult {
    pub balances: Vec<BalanceAggregate>,
    pub from_cache: bool,
}

pub struct BalanceService {
    providers: DashMap<Chain, Arc<dyn BalanceProvider>>,
    cache: Arc<dyn CacheService<AssetValue>>,
    config: BalanceServiceConfig,
}

impl BalanceService {
    pub fn new(cache: Arc<dyn CacheService<AssetValue>>, config: BalanceServiceConfig) -> Self {
        Self {
            providers: DashMap::new(),
            cache,
            config,
        }
    }

    pub fn config(&self) -> &BalanceServiceConfig {
        &self.config
    }

    // ============================================================
    // PROVIDER REGISTRY
    // ============================================================

    /// Register `provider` for `chain`, replacing any previous one
    pub fn register_provider(
        &self,
        chain: Chain,
        provider: Arc<dyn BalanceProvider>,
    ) -> AppResult<()> {
        if !provider.supports_chain(chain) {
            return Err(AppError::invalid_field(
                "chain",
                format!("provider '{}' does not support {}", provider.name(), chain),
            ));
        }
        info!(chain = %chain, provider = provider.name(), "Registered balance provider");
        self.providers.insert(chain, provider);
        Ok(())
    }

    pub fn provider_for(&self, chain: Chain) -> AppResult<Arc<dyn BalanceProvider>> {
        self.providers
            .get(&chain)
            .map(|p| p.value().clone())
            .ok_or_else(|| AppError::not_found("PROVIDER_NOT_FOUND", "balance provider", chain.as_str()))
    }

    /// Drop every cached balance for `address` on `chain`
    pub async fn invalidate_cache(&self, chain: Chain, address: &str) -> AppResult<usize> {
        let native = balance_key(chain, address, None);
        let mut removed = usize::from(self.cache.delete(&native).await?);
        removed += self.cache.invalidate(&format!("{native}:")).await?;
        Ok(removed)
    }

    // ============================================================
    // FETCHING
    // ============================================================

    pub async fn fetch_balances(&self, request: &BalanceRequest) -> AppResult<BalanceFetchResult> {
        let provider = self.provider_for(request.chain)?;
        let native_key = balance_key(request.chain, &request.address, None);

        if !request.force_refresh {
            if let Some(entry) = self.cache.get_entry(&native_key).await? {
                let age = entry.age();
                if age < self.config.cache_ttl {
                    debug!(
                        chain = %request.chain,
                        address = %request.address,
                        age_ms = age.as_millis() as u64,
                        "Serving balance from cache"
                    );
                    let aggregate = native_aggregate(request, entry.value, true, Some(age))?;
                    return Ok(BalanceFetchResult {
                        balances: vec![aggregate],
                        from_cache: true,
                    });
                }
            }
        }

        let native = with_timeout(
            self.config.provider_timeout,
            "fetch_native_balance",
            provider.fetch_native_balance(&request.address, request.chain),
        )
        .await?;

        let mut balances = vec![native_aggregate(request, native.clone(), false, None)?];
        self.cache
            .set(&native_key, native, Some(self.config.cache_ttl))
            .await?;

        if request.include_tokens.unwrap_or(self.config.include_tokens) {
            for token in self.fetch_tokens(provider.as_ref(), request).await {
                let key = balance_key(request.chain, &request.address, Some(token.balance.symbol()));
                let aggregate = match token_aggregate(request, &token) {
                    Ok(aggregate) => aggregate,
                    Err(e) => {
                        warn!(chain = %request.chain, symbol = token.balance.symbol(), error = %e, "Skipping malformed token balance");
                        continue;
                    }
                };
                self.cache
                    .set(&key, token.balance, Some(self.config.cache_ttl))
                    .await?;
                balances.push(aggregate);
            }
        }

        info!(
            chain = %request.chain,
            address = %request.address,
            provider = provider.name(),
            count = balances.len(),
            "Fetched balances"
        );
        Ok(BalanceFetchResult {
            balances,
            from_cache: false,
        })
    }

    /// Best-effort: a failing token lookup yields an empty list
    async fn fetch_tokens(
        &self,
        provider: &dyn BalanceProvider,
        request: &BalanceRequest,
    ) -> Vec<TokenBalance> {
        let result = with_timeout(
            self.config.provider_timeout,
            "fetch_token_balances",
            provider.fetch_token_balances(&request.address, request.chain),
        )
        .await;
        match result {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    chain = %request.chain,
                    provider = provider.name(),
                    error = %e,
                    "Token balance fetch failed, returning native balance only"
                );
                Vec::new()
            }
        }
    }

    /// [`fetch_balances`](Self::fetch_balances) with exponential backoff.
    /// Non-retryable failures, such as a missing provider, return at once.
    pub async fn fetch_balances_with_retry(
        &self,
        request: &BalanceRequest,
    ) -> AppResult<BalanceFetchResult> {
        retry(self.config.retry, "fetch_balances", || self.fetch_balances(request)).await
    }

    /// Fetch many requests, at most `batch_size` in flight; results keep
    /// the order of `requests`.
    pub async fn batch_fetch_balances(
        &self,
        requests: &[BalanceRequest],
    ) -> Vec<AppResult<BalanceFetchResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(self.config.batch_size.max(1)) {
            let chunk_results = join_all(chunk.iter().map(|r| self.fetch_balances(r))).await;
            results.extend(chunk_results);
        }
        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(total = requests.len(), failed, "Batch balance fetch finished");
        results
    }

    // ============================================================
    // UTILITIES
    // ============================================================

    /// Merge balances of the same asset on the same chain across accounts.
    /// Groups keep first-seen order.
    pub fn aggregate_by_asset(balances: &[BalanceAggregate]) -> AppResult<Vec<BalanceAggregate>> {
        let mut order: Vec<(String, Chain)> = Vec::new();
        let mut groups: HashMap<(String, Chain), BalanceAggregate> = HashMap::new();

        for balance in balances {
            let key = (balance.asset_symbol().to_string(), balance.chain());
            match groups.get(&key) {
                Some(existing) => {
                    let merged = existing.merge(balance)?;
                    groups.insert(key, merged);
                }
                None => {
                    order.push(key.clone());
                    groups.insert(key, balance.clone());
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .collect())
    }

    pub fn filter_zero_balances(balances: Vec<BalanceAggregate>) -> Vec<BalanceAggregate> {
        balances
            .into_iter()
            .filter(|b| !b.balance().is_zero())
            .collect()
    }

    /// Highest value first; unpriced balances count as 0
    pub fn sort_by_value(mut balances: Vec<BalanceAggregate>) -> Vec<BalanceAggregate> {
        balances.sort_by(|a, b| {
            let va = a.calculate_value().unwrap_or(0.0);
            let vb = b.calculate_value().unwrap_or(0.0);
            vb.total_cmp(&va)
        });
        balances
    }
}

fn native_aggregate(
    request: &BalanceRequest,
    balance: AssetValue,
    from_cache: bool,
    cache_age: Option<Duration>,
) -> AppResult<BalanceAggregate> {
    let metadata = BalanceMetadata {
        contract_address: None,
        decimals: balance.decimals(),
        is_native: true,
        logo_url: None,
    };
    let mut aggregate = BalanceAggregate::create(NewBalance {
        account_id: request.account_id.clone(),
        asset_symbol: balance.symbol().to_string(),
        asset_name: request.chain.native_name().to_string(),
        chain: request.chain,
        balance: balance.clone(),
        metadata: Some(metadata),
    })?;
    aggregate.update_balance(balance, from_cache, cache_age)?;
    Ok(aggregate)
}

fn token_aggregate(request: &BalanceRequest, token: &TokenBalance) -> AppResult<BalanceAggregate> {
    let metadata = BalanceMetadata {
        contract_address: token.balance.contract_address().map(str::to_string),
        decimals: token.balance.decimals(),
        is_native: false,
        logo_url: token.logo_url.clone(),
    };
    let mut aggregate = BalanceAggregate::create(NewBalance {
        account_id: request.account_id.clone(),
        asset_symbol: token.balance.symbol().to_string(),
        asset_name: token.name.clone(),
        chain: request.chain,
        balance: token.balance.clone(),
        metadata: Some(metadata),
    })?;
    aggregate.update_balance(token.balance.clone(), false, None)?;
    Ok(aggregate)
}
