//! Fetch Services
//!
//! Balance and price lookups that sit between callers, the cache tier and
//! the registered providers.

pub mod balance_service;
pub mod price_service;
pub mod retry;

pub use balance_service::{BalanceFetchResult, BalanceRequest, BalanceService, BalanceServiceConfig};
pub use price_service::{PriceRequest, PriceService, PriceServiceConfig};
pub use retry::{RetryPolicy, retry, with_timeout};
