//! Progressive Loading State
//!
//! Two independent channels, balance and price, each moving through
//! idle → loading → success/error → stale. Every transition returns a new
//! state and only touches its own channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const BALANCE_FRESH_THRESHOLD: Duration = Duration::from_secs(30);
pub const PRICE_FRESH_THRESHOLD: Duration = Duration::from_secs(10);
pub const STALE_THRESHOLD: Duration = Duration::from_secs(60);

const CACHE_FRESH_THRESHOLD: Duration = Duration::from_secs(10);
const CACHE_CACHED_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
    Stale,
}

impl LoadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingStatus::Idle => "idle",
            LoadingStatus::Loading => "loading",
            LoadingStatus::Success => "success",
            LoadingStatus::Error => "error",
            LoadingStatus::Stale => "stale",
        }
    }
}

impl fmt::Display for LoadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which channel(s) `mark_stale` flips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Balance,
    Price,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Fresh,
    Cached,
    Stale,
    None,
}

/// Per-channel answer to "is this old enough to mark stale?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaleCheck {
    pub balance: bool,
    pub price: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetLoadingState {
    balance_status: LoadingStatus,
    price_status: LoadingStatus,
    last_balance_update: Option<DateTime<Utc>>,
    last_price_update: Option<DateTime<Utc>>,
    balance_error: Option<String>,
    price_error: Option<String>,
    is_from_cache: bool,
    cache_age_ms: Option<u64>,
}

fn age(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    since.map(|ts| (now - ts).to_std().unwrap_or(Duration::ZERO))
}

fn require_message(channel: &str, message: &str) -> AppResult<String> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::invalid_field(
            format!("{channel}_error"),
            "error status requires a message",
        ));
    }
    Ok(message.to_string())
}

impl AssetLoadingState {
    /// Both channels idle
    pub fn initial() -> Self {
        Self::default()
    }

    /// Build a state from raw parts, enforcing that an error status carries a message
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        balance_status: LoadingStatus,
        price_status: LoadingStatus,
        last_balance_update: Option<DateTime<Utc>>,
        last_price_update: Option<DateTime<Utc>>,
        balance_error: Option<String>,
        price_error: Option<String>,
        is_from_cache: bool,
        cache_age: Option<Duration>,
    ) -> AppResult<Self> {
        let balance_error = match (balance_status, balance_error) {
            (LoadingStatus::Error, msg) => Some(require_message("balance", msg.as_deref().unwrap_or(""))?),
            (_, msg) => msg,
        };
        let price_error = match (price_status, price_error) {
            (LoadingStatus::Error, msg) => Some(require_message("price", msg.as_deref().unwrap_or(""))?),
            (_, msg) => msg,
        };

        Ok(Self {
            balance_status,
            price_status,
            last_balance_update,
            last_price_update,
            balance_error,
            price_error,
            is_from_cache,
            cache_age_ms: cache_age.map(|d| d.as_millis() as u64),
        })
    }

    // ============================================================
    // GETTERS
    // ============================================================

    pub fn balance_status(&self) -> LoadingStatus {
        self.balance_status
    }

    pub fn price_status(&self) -> LoadingStatus {
        self.price_status
    }

    pub fn last_balance_update(&self) -> Option<DateTime<Utc>> {
        self.last_balance_update
    }

    pub fn last_price_update(&self) -> Option<DateTime<Utc>> {
        self.last_price_update
    }

    pub fn balance_error(&self) -> Option<&str> {
        self.balance_error.as_deref()
    }

    pub fn price_error(&self) -> Option<&str> {
        self.price_error.as_deref()
    }

    pub fn is_from_cache(&self) -> bool {
        self.is_from_cache
    }

    pub fn cache_age(&self) -> Option<Duration> {
        self.cache_age_ms.map(Duration::from_millis)
    }

    // ============================================================
    // BALANCE TRANSITIONS
    // ============================================================

    pub fn loading_balance(&self) -> Self {
        Self {
            balance_status: LoadingStatus::Loading,
            balance_error: None,
            ..self.clone()
        }
    }

    pub fn balance_success(&self, from_cache: bool, cache_age: Option<Duration>) -> Self {
        Self {
            balance_status: LoadingStatus::Success,
            last_balance_update: Some(Utc::now()),
            balance_error: None,
            is_from_cache: from_cache,
            cache_age_ms: cache_age.map(|d| d.as_millis() as u64),
            ..self.clone()
        }
    }

    pub fn balance_error_state(&self, message: &str) -> AppResult<Self> {
        Ok(Self {
            balance_status: LoadingStatus::Error,
            balance_error: Some(require_message("balance", message)?),
            ..self.clone()
        })
    }

    // ============================================================
    // PRICE TRANSITIONS
    // ============================================================

    pub fn loading_price(&self) -> Self {
        Self {
            price_status: LoadingStatus::Loading,
            price_error: None,
            ..self.clone()
        }
    }

    pub fn price_success(&self) -> Self {
        Self {
            price_status: LoadingStatus::Success,
            last_price_update: Some(Utc::now()),
            price_error: None,
            ..self.clone()
        }
    }

    pub fn price_error_state(&self, message: &str) -> AppResult<Self> {
        Ok(Self {
            price_status: LoadingStatus::Error,
            price_error: Some(require_message("price", message)?),
            ..self.clone()
        })
    }

    /// Flip the chosen channel(s) to stale; timestamps stay untouched
    pub fn mark_stale(&self, which: Channel) -> Self {
        let mut next = self.clone();
        if matches!(which, Channel::Balance | Channel::Both) {
            next.balance_status = LoadingStatus::Stale;
        }
        if matches!(which, Channel::Price | Channel::Both) {
            next.price_status = LoadingStatus::Stale;
        }
        next
    }

    // ============================================================
    // QUERIES
    // ============================================================

    /// A channel with no timestamp counts as infinitely old
    pub fn should_mark_stale_at(&self, now: DateTime<Utc>) -> StaleCheck {
        let older_than_threshold =
            |ts| age(ts, now).is_none_or(|a| a > STALE_THRESHOLD);
        StaleCheck {
            balance: older_than_threshold(self.last_balance_update),
            price: older_than_threshold(self.last_price_update),
        }
    }

    pub fn should_mark_stale(&self) -> StaleCheck {
        self.should_mark_stale_at(Utc::now())
    }

    pub fn is_balance_fresh_at(&self, now: DateTime<Utc>) -> bool {
        age(self.last_balance_update, now).is_some_and(|a| a < BALANCE_FRESH_THRESHOLD)
    }

    pub fn is_price_fresh_at(&self, now: DateTime<Utc>) -> bool {
        age(self.last_price_update, now).is_some_and(|a| a < PRICE_FRESH_THRESHOLD)
    }

    pub fn cache_status(&self) -> CacheStatus {
        if !self.is_from_cache {
            return CacheStatus::None;
        }
        match self.cache_age() {
            Some(a) if a < CACHE_FRESH_THRESHOLD => CacheStatus::Fresh,
            Some(a) if a < CACHE_CACHED_THRESHOLD => CacheStatus::Cached,
            _ => CacheStatus::Stale,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.balance_status == LoadingStatus::Loading || self.price_status == LoadingStatus::Loading
    }

    pub fn has_error(&self) -> bool {
        self.balance_status == LoadingStatus::Error || self.price_status == LoadingStatus::Error
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.balance_status == LoadingStatus::Success && self.price_status == LoadingStatus::Success
    }
}
