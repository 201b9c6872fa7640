use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::health::EndpointProbe;
use super::{ChainRpcConfig, RpcEndpoint};
use crate::cache::store::{DurableStore, read_json, write_json};
use crate::chain::Chain;
use crate::error::{AppError, AppResult};
use crate::scheduler::ScheduledTask;
use crate::services::retry::with_timeout;

pub const DEFAULT_STORE_KEY: &str = "rpc-endpoint-config";

const ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// What survives a restart for one chain; defaults are rebuilt instead
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedChainRpc {
    custom_endpoints: Vec<RpcEndpoint>,
    active_endpoint: String,
}

pub struct RpcEndpointRegistry {
    chains: DashMap<Chain, ChainRpcConfig>,
    store: Option<Arc<dyn DurableStore>>,
    store_key: String,
}

impl RpcEndpointRegistry {
    /// Registry with built-in defaults for every chain. Call
    /// [`load`](Self::load) to restore persisted custom endpoints.
    pub fn new(store: Option<Arc<dyn DurableStore>>, store_key: impl Into<String>) -> Self {
        let chains = DashMap::new();
        for chain in Chain::ALL {
            chains.insert(chain, ChainRpcConfig::with_defaults(chain));
        }
        Self {
            chains,
            store,
            store_key: store_key.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None, DEFAULT_STORE_KEY)
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn config(&self, chain: Chain) -> AppResult<ChainRpcConfig> {
        self.chains
            .get(&chain)
            .map(|c| c.value().clone())
            .ok_or_else(|| AppError::not_found("CHAIN_NOT_CONFIGURED", "chain", chain.as_str()))
    }

    pub fn active_endpoint(&self, chain: Chain) -> AppResult<String> {
        Ok(self.config(chain)?.active_endpoint().to_string())
    }

    /// Defaults followed by custom endpoints
    pub fn endpoints(&self, chain: Chain) -> AppResult<Vec<RpcEndpoint>> {
        Ok(self.config(chain)?.all_endpoints().cloned().collect())
    }

    pub fn get_next_healthy_endpoint(&self, chain: Chain, current: Option<&str>) -> Option<String> {
        let config = self.chains.get(&chain)?;
        config.next_healthy(current).map(|e| e.url.clone())
    }

    // ============================================================
    // MUTATIONS
    // ============================================================

    /// Apply `f` to the chain's config without holding the lock across an await
    fn with_config<T>(
        &self,
        chain: Chain,
        f: impl FnOnce(&mut ChainRpcConfig) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut config = self
            .chains
            .get_mut(&chain)
            .ok_or_else(|| AppError::not_found("CHAIN_NOT_CONFIGURED", "chain", chain.as_str()))?;
        f(config.value_mut())
    }

    pub async fn set_active_endpoint(&self, chain: Chain, url: &str) -> AppResult<()> {
        self.with_config(chain, |config| {
            if !config.contains(url) {
                return Err(AppError::invalid_field(
                    "url",
                    format!("{url} is not a configured endpoint for {chain}"),
                ));
            }
            config.active_endpoint = url.to_string();
            Ok(())
        })?;
        info!(chain = %chain, url, "Active RPC endpoint changed");
        self.persist().await
    }

    /// Record a health observation. Health is not persisted.
    pub fn update_endpoint_health(
        &self,
        chain: Chain,
        url: &str,
        healthy: bool,
        response_time: Option<Duration>,
    ) -> AppResult<()> {
        self.with_config(chain, |config| {
            let endpoint = config
                .endpoint_mut(url)
                .ok_or_else(|| AppError::not_found("ENDPOINT_NOT_FOUND", "rpc endpoint", url))?;
            endpoint.is_healthy = healthy;
            endpoint.last_checked = Some(Utc::now());
            if let Some(rt) = response_time {
                endpoint.response_time_ms = Some(rt.as_millis() as u64);
            }
            Ok(())
        })
    }

    pub async fn add_custom_endpoint(&self, chain: Chain, url: &str) -> AppResult<()> {
        let url = validate_url(url)?;
        self.with_config(chain, |config| {
            if config.contains(&url) {
                return Err(AppError::invalid_field(
                    "url",
                    format!("{url} is already configured for {chain}"),
                ));
            }
            config.custom_endpoints.push(RpcEndpoint::new(url.clone()));
            Ok(())
        })?;
        info!(chain = %chain, url = %url, "Custom RPC endpoint added");
        self.persist().await
    }

    /// Remove a custom endpoint; returns false if it was not one.
    /// Removing the active endpoint makes the first default active.
    pub async fn remove_custom_endpoint(&self, chain: Chain, url: &str) -> AppResult<bool> {
        let removed = self.with_config(chain, |config| {
            let before = config.custom_endpoints.len();
            config.custom_endpoints.retain(|e| e.url != url);
            let removed = config.custom_endpoints.len() != before;
            if removed && config.active_endpoint == url {
                config.active_endpoint = config.first_default();
            }
            Ok(removed)
        })?;
        if removed {
            info!(chain = %chain, url, "Custom RPC endpoint removed");
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Drop custom endpoints and health history for `chain`
    pub async fn reset_chain(&self, chain: Chain) -> AppResult<()> {
        self.chains.insert(chain, ChainRpcConfig::with_defaults(chain));
        info!(chain = %chain, "RPC configuration reset to defaults");
        self.persist().await
    }

    /// Move the active pointer to the next healthy endpoint
    pub async fn failover(&self, chain: Chain) -> AppResult<String> {
        let next = self.with_config(chain, |config| {
            let next = config
                .next_healthy(Some(config.active_endpoint()))
                .map(|e| e.url.clone())
                .ok_or_else(|| {
                    AppError::not_found("NO_HEALTHY_ENDPOINT", "healthy rpc endpoint", chain.as_str())
                })?;
            config.active_endpoint = next.clone();
            Ok(next)
        })?;
        warn!(chain = %chain, url = %next, "Failed over to next RPC endpoint");
        self.persist().await?;
        Ok(next)
    }

    // ============================================================
    // PERSISTENCE
    // ============================================================

    /// Restore custom endpoints and active pointers. Returns the number of
    /// chains restored; unknown active pointers fall back to the default.
    pub async fn load(&self) -> AppResult<usize> {
        let Some(store) = self.store.as_deref() else {
            return Ok(0);
        };
        let Some(saved) =
            read_json::<BTreeMap<Chain, PersistedChainRpc>>(store, &self.store_key).await?
        else {
            return Ok(0);
        };

        let mut restored = 0;
        for (chain, record) in saved {
            let mut config = ChainRpcConfig::with_defaults(chain);
            for endpoint in record.custom_endpoints {
                if !config.contains(&endpoint.url) {
                    config.custom_endpoints.push(endpoint);
                }
            }
            if config.contains(&record.active_endpoint) {
                config.active_endpoint = record.active_endpoint;
            } else {
                warn!(chain = %chain, url = %record.active_endpoint, "Persisted active endpoint no longer configured");
            }
            self.chains.insert(chain, config);
            restored += 1;
        }
        info!(restored, "RPC configuration loaded");
        Ok(restored)
    }

    async fn persist(&self) -> AppResult<()> {
        let Some(store) = self.store.as_deref() else {
            return Ok(());
        };
        let snapshot: BTreeMap<Chain, PersistedChainRpc> = self
            .chains
            .iter()
            .map(|entry| {
                let config = entry.value();
                (
                    *entry.key(),
                    PersistedChainRpc {
                        custom_endpoints: config.custom_endpoints.clone(),
                        active_endpoint: config.active_endpoint.clone(),
                    },
                )
            })
            .collect();
        write_json(store, &self.store_key, &snapshot).await?;
        store.flush().await
    }

    // ============================================================
    // HEALTH CHECKS
    // ============================================================

    /// Probe every endpoint of `chain` concurrently, each bounded by
    /// `timeout`. Returns how many answered.
    pub async fn run_health_checks(
        &self,
        chain: Chain,
        probe: &dyn EndpointProbe,
        timeout: Duration,
    ) -> AppResult<usize> {
        let urls: Vec<String> = self.endpoints(chain)?.into_iter().map(|e| e.url).collect();

        let outcomes = join_all(urls.iter().map(|url| async move {
            let started = Instant::now();
            let result = with_timeout(timeout, "rpc_probe", probe.probe(chain, url)).await;
            (url, result, started.elapsed())
        }))
        .await;

        let mut healthy = 0;
        for (url, result, elapsed) in outcomes {
            let recorded = match result {
                Ok(()) => {
                    healthy += 1;
                    self.update_endpoint_health(chain, url, true, Some(elapsed))
                }
                Err(e) => {
                    debug!(chain = %chain, url = %url, error = %e, "Endpoint unhealthy");
                    self.update_endpoint_health(chain, url, false, None)
                }
            };
            // Removed while the probe was in flight
            if let Err(e) = recorded {
                debug!(chain = %chain, url = %url, error = %e, "Dropped health result");
            }
        }

        if healthy < urls.len() {
            warn!(chain = %chain, healthy, total = urls.len(), "Some RPC endpoints are unhealthy");
        }
        Ok(healthy)
    }

    pub async fn run_all_health_checks(&self, probe: &dyn EndpointProbe, timeout: Duration) {
        for chain in Chain::ALL {
            if let Err(e) = self.run_health_checks(chain, probe, timeout).await {
                warn!(chain = %chain, error = %e, "Health check run failed");
            }
        }
    }

    /// Check all chains every `every` until the returned task stops
    pub fn start_health_checks(
        self: &Arc<Self>,
        probe: Arc<dyn EndpointProbe>,
        every: Duration,
        timeout: Duration,
    ) -> ScheduledTask {
        let weak: Weak<Self> = Arc::downgrade(self);
        ScheduledTask::spawn("rpc-health", every, move || {
            let weak = weak.clone();
            let probe = probe.clone();
            async move {
                if let Some(registry) = weak.upgrade() {
                    registry.run_all_health_checks(probe.as_ref(), timeout).await;
                }
            }
        })
    }
}

fn validate_url(raw: &str) -> AppResult<String> {
    let raw = raw.trim();
    let parsed = url::Url::parse(raw)
        .map_err(|e| AppError::invalid_field("url", format!("invalid URL '{raw}': {e}")))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(AppError::invalid_field(
            "url",
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(AppError::invalid_field("url", format!("'{raw}' has no host")));
    }
    Ok(raw.to_string())
}
