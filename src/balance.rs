//! Balance Aggregate
//!
//! One asset held by one account on one chain, together with its optional
//! price and the progressive loading state of both.
//!
//! # Enforcement
//! - Fields are private; every mutation goes through a method
//! - Every mutation increments `version`
//! - Mutation assumes a single owner. Nothing here guards against two call
//!   sites mutating the same aggregate concurrently; keep each aggregate in
//!   exactly one owning store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::chain::Chain;
use crate::error::{AppError, AppResult};
use crate::loading_state::{AssetLoadingState, Channel, LoadingStatus};
use crate::money::AssetValue;
use crate::price::Price;

/// Chain-specific details about the held asset
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceMetadata {
    pub contract_address: Option<String>,
    pub decimals: u32,
    pub is_native: bool,
    pub logo_url: Option<String>,
}

/// Factory input for [`BalanceAggregate::create`]
#[derive(Debug, Clone)]
pub struct NewBalance {
    pub account_id: String,
    pub asset_symbol: String,
    pub asset_name: String,
    pub chain: Chain,
    pub balance: AssetValue,
    pub metadata: Option<BalanceMetadata>,
}

/// Which parts of an aggregate are due for a refetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshNeeds {
    pub balance: bool,
    pub price: bool,
}

/// Deserialization re-runs the identity checks of [`BalanceAggregate::create`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BalanceRecord", into = "BalanceRecord")]
pub struct BalanceAggregate {
    id: String,
    account_id: String,
    asset_symbol: String,
    asset_name: String,
    chain: Chain,
    balance: AssetValue,
    price: Option<Price>,
    loading_state: AssetLoadingState,
    version: u64,
    metadata: Option<BalanceMetadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRecord {
    id: String,
    account_id: String,
    asset_symbol: String,
    asset_name: String,
    chain: Chain,
    balance: AssetValue,
    price: Option<Price>,
    loading_state: AssetLoadingState,
    version: u64,
    metadata: Option<BalanceMetadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BalanceRecord> for BalanceAggregate {
    type Error = AppError;

    fn try_from(r: BalanceRecord) -> Result<Self, Self::Error> {
        let id = non_empty("id", &r.id)?;
        let (account_id, asset_symbol, asset_name) =
            checked_identity(&r.account_id, &r.asset_symbol, &r.asset_name, &r.balance)?;
        Ok(Self {
            id,
            account_id,
            asset_symbol,
            asset_name,
            chain: r.chain,
            balance: r.balance,
            price: r.price,
            loading_state: r.loading_state,
            version: r.version,
            metadata: r.metadata,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

impl From<BalanceAggregate> for BalanceRecord {
    fn from(b: BalanceAggregate) -> Self {
        BalanceRecord {
            id: b.id,
            account_id: b.account_id,
            asset_symbol: b.asset_symbol,
            asset_name: b.asset_name,
            chain: b.chain,
            balance: b.balance,
            price: b.price,
            loading_state: b.loading_state,
            version: b.version,
            metadata: b.metadata,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

/// Trimmed account id, upper-case symbol and name; the balance must be
/// denominated in the symbol
fn checked_identity(
    account_id: &str,
    asset_symbol: &str,
    asset_name: &str,
    balance: &AssetValue,
) -> AppResult<(String, String, String)> {
    let account_id = non_empty("account_id", account_id)?;
    let asset_symbol = non_empty("asset_symbol", asset_symbol)?.to_uppercase();
    let asset_name = non_empty("asset_name", asset_name)?;

    if balance.symbol() != asset_symbol {
        return Err(AppError::invalid_field(
            "balance",
            format!(
                "balance is denominated in {}, expected {}",
                balance.symbol(),
                asset_symbol
            ),
        ));
    }
    Ok((account_id, asset_symbol, asset_name))
}

fn non_empty(field: &'static str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::invalid_field(field, "must not be empty"));
    }
    Ok(value.to_string())
}

/// Worst case of two channel statuses: error > loading > success
fn worst_status(a: LoadingStatus, b: LoadingStatus) -> LoadingStatus {
    if a == LoadingStatus::Error || b == LoadingStatus::Error {
        LoadingStatus::Error
    } else if a == LoadingStatus::Loading || b == LoadingStatus::Loading {
        LoadingStatus::Loading
    } else {
        LoadingStatus::Success
    }
}

impl BalanceAggregate {
    pub fn create(input: NewBalance) -> AppResult<Self> {
        let (account_id, asset_symbol, asset_name) = checked_identity(
            &input.account_id,
            &input.asset_symbol,
            &input.asset_name,
            &input.balance,
        )?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            asset_symbol,
            asset_name,
            chain: input.chain,
            balance: input.balance,
            price: None,
            loading_state: AssetLoadingState::initial(),
            version: 0,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn asset_symbol(&self) -> &str {
        &self.asset_symbol
    }

    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn balance(&self) -> &AssetValue {
        &self.balance
    }

    pub fn price(&self) -> Option<&Price> {
        self.price.as_ref()
    }

    pub fn loading_state(&self) -> &AssetLoadingState {
        &self.loading_state
    }

    pub const fn version(&self) -> u64 {
        self.version
    }

    pub fn metadata(&self) -> Option<&BalanceMetadata> {
        self.metadata.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `{symbol}-{chain}-{account}`: stable across refresh cycles
    pub fn aggregate_key(&self) -> String {
        format!("{}-{}-{}", self.asset_symbol, self.chain, self.account_id)
    }

    // ============================================================
    // MUTATIONS (each one advances version)
    // ============================================================

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    pub fn update_balance(
        &mut self,
        balance: AssetValue,
        from_cache: bool,
        cache_age: Option<Duration>,
    ) -> AppResult<()> {
        if balance.symbol() != self.asset_symbol {
            return Err(AppError::invalid_field(
                "balance",
                format!("expected {}, got {}", self.asset_symbol, balance.symbol()),
            ));
        }
        self.balance = balance;
        self.loading_state = self.loading_state.balance_success(from_cache, cache_age);
        self.touch();
        Ok(())
    }

    pub fn update_price(&mut self, price: Price) {
        self.price = Some(price);
        self.loading_state = self.loading_state.price_success();
        self.touch();
    }

    pub fn set_balance_loading(&mut self) {
        self.loading_state = self.loading_state.loading_balance();
        self.touch();
    }

    pub fn set_price_loading(&mut self) {
        self.loading_state = self.loading_state.loading_price();
        self.touch();
    }

    pub fn set_balance_error(&mut self, message: &str) -> AppResult<()> {
        self.loading_state = self.loading_state.balance_error_state(message)?;
        self.touch();
        Ok(())
    }

    pub fn set_price_error(&mut self, message: &str) -> AppResult<()> {
        self.loading_state = self.loading_state.price_error_state(message)?;
        self.touch();
        Ok(())
    }

    pub fn mark_stale(&mut self, which: Channel) {
        self.loading_state = self.loading_state.mark_stale(which);
        self.touch();
    }

    // ============================================================
    // QUERIES
    // ============================================================

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> RefreshNeeds {
        let state = &self.loading_state;
        let stale = state.should_mark_stale_at(now);

        let balance = stale.balance
            || !state.is_balance_fresh_at(now)
            || matches!(
                state.balance_status(),
                LoadingStatus::Error | LoadingStatus::Stale
            );

        let price = stale.price
            || !state.is_price_fresh_at(now)
            || matches!(
                state.price_status(),
                LoadingStatus::Error | LoadingStatus::Stale
            )
            || self.price.as_ref().is_none_or(|p| p.is_expired_at(now));

        RefreshNeeds { balance, price }
    }

    pub fn needs_refresh(&self) -> RefreshNeeds {
        self.needs_refresh_at(Utc::now())
    }

    /// Balance × price, or `None` until a price is known
    pub fn calculate_value(&self) -> Option<f64> {
        self.price
            .as_ref()
            .map(|p| self.balance.amount_as_number() * p.amount())
    }

    /// Worst-case (balance, price) statuses across two aggregates
    pub fn merged_statuses(&self, other: &BalanceAggregate) -> (LoadingStatus, LoadingStatus) {
        (
            worst_status(
                self.loading_state.balance_status(),
                other.loading_state.balance_status(),
            ),
            worst_status(
                self.loading_state.price_status(),
                other.loading_state.price_status(),
            ),
        )
    }

    /// Combine two holdings of the same asset on the same chain.
    ///
    /// Balances are summed and the newer price wins. The result starts with an
    /// idle loading state; use [`merged_statuses`](Self::merged_statuses) for
    /// the worst-case view of the inputs.
    pub fn merge(&self, other: &BalanceAggregate) -> AppResult<BalanceAggregate> {
        if self.asset_symbol != other.asset_symbol {
            return Err(AppError::validation(format!(
                "cannot merge {} with {}",
                self.asset_symbol, other.asset_symbol
            )));
        }
        if self.chain != other.chain {
            return Err(AppError::validation(format!(
                "cannot merge balances across chains ({} vs {})",
                self.chain, other.chain
            )));
        }

        let balance = self.balance.add(&other.balance)?;
        let price = match (&self.price, &other.price) {
            (Some(a), Some(b)) if b.timestamp() > a.timestamp() => Some(b.clone()),
            (Some(a), _) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        let now = Utc::now();
        Ok(BalanceAggregate {
            id: Uuid::new_v4().to_string(),
            account_id: self.account_id.clone(),
            asset_symbol: self.asset_symbol.clone(),
            asset_name: self.asset_name.clone(),
            chain: self.chain,
            balance,
            price,
            loading_state: AssetLoadingState::initial(),
            version: self.version.max(other.version) + 1,
            metadata: self.metadata.clone().or_else(|| other.metadata.clone()),
            created_at: self.created_at.min(other.created_at),
            updated_at: now,
        })
    }
}
