//! Cache key scheme
//!
//! - prices: `price:<SYMBOL>:<CURRENCY>`
//! - balances: `balance:<chain>:<address>[:<SYMBOL>]`

use crate::chain::Chain;

pub fn price_key(symbol: &str, currency: &str) -> String {
    format!(
        "price:{}:{}",
        symbol.trim().to_uppercase(),
        currency.trim().to_uppercase()
    )
}

/// Native balance when `symbol` is `None`, otherwise a token balance
pub fn balance_key(chain: Chain, address: &str, symbol: Option<&str>) -> String {
    match symbol {
        Some(symbol) => format!(
            "balance:{}:{}:{}",
            chain,
            address.trim(),
            symbol.trim().to_uppercase()
        ),
        None => format!("balance:{}:{}", chain, address.trim()),
    }
}
