//! Portfolio Summary
//!
//! Roll-up of a set of balances for progressive display: the value of
//! everything priced so far plus counts of what is still outstanding.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::balance::BalanceAggregate;
use crate::chain::Chain;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub currency: String,
    pub total_value: f64,
    pub by_chain: BTreeMap<Chain, f64>,
    pub total: usize,
    pub priced: usize,
    /// No price, or a price in another currency
    pub unpriced: usize,
    /// Either channel still loading
    pub loading: usize,
    /// Either channel in error
    pub errored: usize,
}

impl PortfolioSummary {
    pub fn summarize(balances: &[BalanceAggregate], currency: &str) -> Self {
        let currency = currency.trim().to_uppercase();
        let mut summary = Self {
            currency,
            total_value: 0.0,
            by_chain: BTreeMap::new(),
            total: balances.len(),
            priced: 0,
            unpriced: 0,
            loading: 0,
            errored: 0,
        };

        for balance in balances {
            let state = balance.loading_state();
            if state.is_loading() {
                summary.loading += 1;
            }
            if state.has_error() {
                summary.errored += 1;
            }

            let value = balance
                .price()
                .filter(|p| p.currency() == summary.currency)
                .and_then(|_| balance.calculate_value());
            match value {
                Some(value) => {
                    summary.priced += 1;
                    summary.total_value += value;
                    *summary.by_chain.entry(balance.chain()).or_insert(0.0) += value;
                }
                None => summary.unpriced += 1,
            }
        }

        summary
    }

    /// Nothing left to load, price or retry
    pub fn is_complete(&self) -> bool {
        self.loading == 0 && self.errored == 0 && self.unpriced == 0
    }

    /// Share of balances that have a value, 0.0 to 1.0
    pub fn priced_ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.priced as f64 / self.total as f64
        }
    }

    /// Chain's share of the total value in percent
    pub fn chain_share_pct(&self, chain: Chain) -> f64 {
        if self.total_value == 0.0 {
            return 0.0;
        }
        self.by_chain.get(&chain).copied().unwrap_or(0.0) / self.total_value * 100.0
    }
}
