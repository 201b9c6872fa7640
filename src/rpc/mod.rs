//! RPC Endpoint Registry
//!
//! Per-chain endpoint lists with health tracking, an active-endpoint
//! pointer and round-robin failover. The registry is an explicit object:
//! build one at startup and hand an `Arc` to every provider that picks
//! endpoints.

pub mod defaults;
pub mod health;
mod registry;

pub use health::{EndpointProbe, JsonRpcProbe};
pub use registry::{DEFAULT_STORE_KEY, RpcEndpointRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcEndpoint {
    pub url: String,
    pub is_healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
}

impl RpcEndpoint {
    /// Unchecked endpoints start out healthy
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_healthy: true,
            last_checked: None,
            response_time_ms: None,
        }
    }
}

/// Endpoint configuration for one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRpcConfig {
    chain: Chain,
    default_endpoints: Vec<RpcEndpoint>,
    custom_endpoints: Vec<RpcEndpoint>,
    active_endpoint: String,
}

impl ChainRpcConfig {
    /// Built-in endpoints only, the first one active
    pub fn with_defaults(chain: Chain) -> Self {
        let default_endpoints: Vec<RpcEndpoint> = defaults::default_endpoints(chain)
            .iter()
            .map(|url| RpcEndpoint::new(*url))
            .collect();
        let active_endpoint = default_endpoints
            .first()
            .map(|e| e.url.clone())
            .unwrap_or_default();
        Self {
            chain,
            default_endpoints,
            custom_endpoints: Vec::new(),
            active_endpoint,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn default_endpoints(&self) -> &[RpcEndpoint] {
        &self.default_endpoints
    }

    pub fn custom_endpoints(&self) -> &[RpcEndpoint] {
        &self.custom_endpoints
    }

    pub fn active_endpoint(&self) -> &str {
        &self.active_endpoint
    }

    /// Defaults first, then custom endpoints
    pub fn all_endpoints(&self) -> impl Iterator<Item = &RpcEndpoint> {
        self.default_endpoints
            .iter()
            .chain(self.custom_endpoints.iter())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.all_endpoints().any(|e| e.url == url)
    }

    pub fn endpoint(&self, url: &str) -> Option<&RpcEndpoint> {
        self.all_endpoints().find(|e| e.url == url)
    }

    fn endpoint_mut(&mut self, url: &str) -> Option<&mut RpcEndpoint> {
        self.default_endpoints
            .iter_mut()
            .chain(self.custom_endpoints.iter_mut())
            .find(|e| e.url == url)
    }

    fn first_default(&self) -> String {
        self.default_endpoints
            .first()
            .map(|e| e.url.clone())
            .unwrap_or_default()
    }

    /// Next healthy endpoint after `current` in list order.
    ///
    /// With no `current`, or when `current` is the last healthy endpoint or
    /// not a healthy endpoint at all, wraps to the first healthy one.
    pub fn next_healthy(&self, current: Option<&str>) -> Option<&RpcEndpoint> {
        let healthy: Vec<&RpcEndpoint> = self.all_endpoints().filter(|e| e.is_healthy).collect();
        let position = current.and_then(|url| healthy.iter().position(|e| e.url == url));
        match position {
            Some(i) if i + 1 < healthy.len() => Some(healthy[i + 1]),
            _ => healthy.first().copied(),
        }
    }
}
