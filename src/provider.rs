//! Data Providers
//!
//! Capability traits for the external sources the fetch services consult.
//! Services hold providers as `Arc<dyn ...>`: shared, never cloned. Expected
//! failures come back as `AppError` values, never panics.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::chain::Chain;
use crate::error::AppResult;
use crate::money::AssetValue;
use crate::price::Price;

/// A non-native token held at an address
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalance {
    pub balance: AssetValue,
    pub name: String,
    pub logo_url: Option<String>,
}

impl TokenBalance {
    pub fn new(balance: AssetValue, name: impl Into<String>) -> Self {
        Self {
            balance,
            name: name.into(),
            logo_url: None,
        }
    }
}

/// Source of on-chain balances for one or more chains
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    fn supports_chain(&self, chain: Chain) -> bool;

    /// Balance of the chain's native asset
    async fn fetch_native_balance(&self, address: &str, chain: Chain) -> AppResult<AssetValue>;

    async fn fetch_token_balances(&self, address: &str, chain: Chain)
    -> AppResult<Vec<TokenBalance>>;
}

/// Source of market prices
///
/// Lower `priority` is tried first.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> u32;

    async fn fetch_price(&self, symbol: &str, currency: &str) -> AppResult<Price>;

    /// Prices for as many of `symbols` as the provider knows; keys are
    /// upper-case symbols. Unknown symbols are simply absent.
    async fn fetch_batch_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> AppResult<HashMap<String, Price>>;
}

/// Mock providers for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct MockBalanceProvider {
        name: String,
        chains: Vec<Chain>,
        native: Mutex<HashMap<(Chain, String), AssetValue>>,
        tokens: Mutex<Vec<TokenBalance>>,
        native_calls: AtomicUsize,
        token_calls: AtomicUsize,
        /// Remaining native calls that fail before succeeding
        failures_left: AtomicUsize,
        fail_tokens: AtomicBool,
    }

    impl MockBalanceProvider {
        pub fn new(name: &str, chains: &[Chain]) -> Self {
            Self {
                name: name.to_string(),
                chains: chains.to_vec(),
                native: Mutex::new(HashMap::new()),
                tokens: Mutex::new(Vec::new()),
                native_calls: AtomicUsize::new(0),
                token_calls: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                fail_tokens: AtomicBool::new(false),
            }
        }

        pub fn set_native(&self, chain: Chain, address: &str, value: AssetValue) {
            self.native
                .lock()
                .unwrap()
                .insert((chain, address.to_string()), value);
        }

        pub fn set_tokens(&self, tokens: Vec<TokenBalance>) {
            *self.tokens.lock().unwrap() = tokens;
        }

        pub fn fail_next(&self, n: usize) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        pub fn set_fail_tokens(&self, fail: bool) {
            self.fail_tokens.store(fail, Ordering::SeqCst);
        }

        pub fn native_calls(&self) -> usize {
            self.native_calls.load(Ordering::SeqCst)
        }

        pub fn token_calls(&self) -> usize {
            self.token_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceProvider for MockBalanceProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_chain(&self, chain: Chain) -> bool {
            self.chains.contains(&chain)
        }

        async fn fetch_native_balance(&self, address: &str, chain: Chain) -> AppResult<AssetValue> {
            self.native_calls.fetch_add(1, Ordering::SeqCst);
            let should_fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(AppError::Network("mock connection reset".into()));
            }

            let found = self
                .native
                .lock()
                .unwrap()
                .get(&(chain, address.to_string()))
                .cloned();
            match found {
                Some(value) => Ok(value),
                None => AssetValue::zero(chain.native_symbol(), Some(chain.native_decimals())),
            }
        }

        async fn fetch_token_balances(
            &self,
            _address: &str,
            _chain: Chain,
        ) -> AppResult<Vec<TokenBalance>> {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_tokens.load(Ordering::SeqCst) {
                return Err(AppError::external(&self.name, "token index unavailable"));
            }
            Ok(self.tokens.lock().unwrap().clone())
        }
    }

    pub struct MockPriceProvider {
        name: String,
        priority: u32,
        prices: Mutex<HashMap<String, f64>>,
        failing: AtomicBool,
        /// Added to every call
        delay_ms: AtomicU64,
        single_calls: AtomicUsize,
        batch_calls: AtomicUsize,
    }

    impl MockPriceProvider {
        pub fn new(name: &str, priority: u32) -> Self {
            Self {
                name: name.to_string(),
                priority,
                prices: Mutex::new(HashMap::new()),
                failing: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
                single_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_price(self, symbol: &str, amount: f64) -> Self {
            self.set_price(symbol, amount);
            self
        }

        pub fn set_price(&self, symbol: &str, amount: f64) {
            self.prices
                .lock()
                .unwrap()
                .insert(symbol.to_uppercase(), amount);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Duration) {
            self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        async fn wait(&self) {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        pub fn single_calls(&self) -> usize {
            self.single_calls.load(Ordering::SeqCst)
        }

        pub fn batch_calls(&self) -> usize {
            self.batch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceProvider for MockPriceProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        async fn fetch_price(&self, symbol: &str, currency: &str) -> AppResult<Price> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            self.wait().await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::external(&self.name, "upstream returned 503"));
            }
            let amount = self.prices.lock().unwrap().get(&symbol.to_uppercase()).copied();
            match amount {
                Some(amount) => Price::live(amount, currency, Some(&self.name), 95),
                None => Err(AppError::external(
                    &self.name,
                    format!("no quote for {symbol}"),
                )),
            }
        }

        async fn fetch_batch_prices(
            &self,
            symbols: &[String],
            currency: &str,
        ) -> AppResult<HashMap<String, Price>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.wait().await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::external(&self.name, "upstream returned 503"));
            }
            let prices = self.prices.lock().unwrap().clone();
            let mut found = HashMap::new();
            for symbol in symbols {
                let symbol = symbol.to_uppercase();
                if let Some(amount) = prices.get(&symbol) {
                    found.insert(
                        symbol,
                        Price::live(*amount, currency, Some(&self.name), 95)?,
                    );
                }
            }
            Ok(found)
        }
    }
}
