//! portfolio_core - Progressive Multi-Chain Portfolio Loading
//!
//! Balances and prices are fetched, cached and refreshed independently so a
//! portfolio can be shown while the rest of it resolves.
//!
//! # Modules
//!
//! - [`money`] - Precision-safe asset amounts (`AssetValue`)
//! - [`price`] - Timestamped prices with source, confidence and TTL
//! - [`loading_state`] - Two-channel progressive loading state machine
//! - [`balance`] - `BalanceAggregate`: balance + price + loading state
//! - [`chain`] - Supported chains and their native assets
//! - [`cache`] - Two-tier (hot/durable) cache
//! - [`rpc`] - Per-chain RPC endpoint registry with health and failover
//! - [`provider`] - Balance and price provider traits
//! - [`services`] - Balance and price fetch services
//! - [`portfolio`] - Portfolio roll-up for display
//! - [`scheduler`] - Cancellable periodic background tasks
//! - [`config`] / [`logging`] - YAML configuration and tracing setup

pub mod error;

// Value types
pub mod balance;
pub mod chain;
pub mod loading_state;
pub mod money;
pub mod price;

// Infrastructure
pub mod cache;
pub mod config;
pub mod logging;
pub mod rpc;
pub mod scheduler;

// Fetching
pub mod portfolio;
pub mod provider;
pub mod services;

// Convenient re-exports at crate root
pub use balance::{BalanceAggregate, BalanceMetadata, NewBalance, RefreshNeeds};
pub use cache::{CacheEntry, CacheService, CacheStats, DurableStore, MemoryStore, SledStore, TieredCache};
pub use chain::{Chain, ChainFamily};
pub use config::{AppConfig, ConfigError};
pub use error::{AppError, AppResult, Severity};
pub use loading_state::{AssetLoadingState, CacheStatus, Channel, LoadingStatus};
pub use money::{AssetValue, MoneyError};
pub use portfolio::PortfolioSummary;
pub use price::{Price, PriceQuality, PriceSource};
pub use provider::{BalanceProvider, PriceProvider, TokenBalance};
pub use rpc::{ChainRpcConfig, EndpointProbe, JsonRpcProbe, RpcEndpoint, RpcEndpointRegistry};
pub use scheduler::ScheduledTask;
pub use services::{
    BalanceFetchResult, BalanceRequest, BalanceService, BalanceServiceConfig, PriceRequest,
    PriceService, PriceServiceConfig, RetryPolicy,
};
