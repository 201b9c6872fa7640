//! Price Value Type
//!
//! A timestamped quote for one asset in one currency. Age is always derived
//! from the timestamp; the source decides the default time-to-live and how
//! much the quote is trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const LIVE_TTL: Duration = Duration::from_secs(10);
pub const CACHED_TTL: Duration = Duration::from_secs(60);
pub const FALLBACK_TTL: Duration = Duration::from_secs(300);

/// Confidence never drops below this on a soft refresh
const REFRESH_CONFIDENCE_FLOOR: u8 = 50;
const REFRESH_CONFIDENCE_PENALTY: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Live,
    Cached,
    Fallback,
    Manual,
}

impl PriceSource {
    /// Default TTL; manual prices never expire
    pub fn default_ttl(&self) -> Option<Duration> {
        match self {
            PriceSource::Live => Some(LIVE_TTL),
            PriceSource::Cached => Some(CACHED_TTL),
            PriceSource::Fallback => Some(FALLBACK_TTL),
            PriceSource::Manual => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Live => "live",
            PriceSource::Cached => "cached",
            PriceSource::Fallback => "fallback",
            PriceSource::Manual => "manual",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceQuality {
    High,
    Medium,
    Low,
}

/// Read back through [`Price::new`], so stored prices get the same checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriceRecord", into = "PriceRecord")]
pub struct Price {
    amount: f64,
    currency: String,
    timestamp: DateTime<Utc>,
    source: PriceSource,
    provider: Option<String>,
    confidence: u8,
    ttl_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceRecord {
    amount: f64,
    currency: String,
    timestamp: DateTime<Utc>,
    source: PriceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
}

impl TryFrom<PriceRecord> for Price {
    type Error = AppError;

    fn try_from(r: PriceRecord) -> Result<Self, Self::Error> {
        let mut price = Price::new(
            r.amount,
            &r.currency,
            r.source,
            r.provider.as_deref(),
            r.confidence,
        )?;
        price.timestamp = r.timestamp;
        price.ttl_ms = r.ttl_ms;
        Ok(price)
    }
}

impl From<Price> for PriceRecord {
    fn from(p: Price) -> Self {
        PriceRecord {
            amount: p.amount,
            currency: p.currency,
            timestamp: p.timestamp,
            source: p.source,
            provider: p.provider,
            confidence: p.confidence,
            ttl_ms: p.ttl_ms,
        }
    }
}

impl Price {
    /// Validated constructor. The TTL defaults from the source.
    pub fn new(
        amount: f64,
        currency: &str,
        source: PriceSource,
        provider: Option<&str>,
        confidence: u8,
    ) -> AppResult<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(AppError::invalid_field(
                "amount",
                format!("price must be finite and non-negative, got {amount}"),
            ));
        }
        let currency = currency.trim();
        if currency.is_empty() {
            return Err(AppError::invalid_field("currency", "must not be empty"));
        }
        if confidence > 100 {
            return Err(AppError::invalid_field(
                "confidence",
                format!("must be within 0-100, got {confidence}"),
            ));
        }

        Ok(Self {
            amount,
            currency: currency.to_uppercase(),
            timestamp: Utc::now(),
            source,
            provider: provider.map(str::to_string),
            confidence,
            ttl_ms: source.default_ttl().map(|d| d.as_millis() as u64),
        })
    }

    pub fn live(amount: f64, currency: &str, provider: Option<&str>, confidence: u8) -> AppResult<Self> {
        Self::new(amount, currency, PriceSource::Live, provider, confidence)
    }

    pub fn cached(amount: f64, currency: &str, provider: Option<&str>, confidence: u8) -> AppResult<Self> {
        Self::new(amount, currency, PriceSource::Cached, provider, confidence)
    }

    pub fn fallback(amount: f64, currency: &str, provider: Option<&str>, confidence: u8) -> AppResult<Self> {
        Self::new(amount, currency, PriceSource::Fallback, provider, confidence)
    }

    /// Operator-entered price: full confidence, never expires
    pub fn manual(amount: f64, currency: &str) -> AppResult<Self> {
        Self::new(amount, currency, PriceSource::Manual, Some("manual"), 100)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl_ms = ttl.map(|d| d.as_millis() as u64);
        self
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// `true` once the age exceeds this price's own TTL
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl() {
            Some(ttl) => self.age_at(now) > ttl,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn quality_at(&self, now: DateTime<Utc>) -> PriceQuality {
        let age = self.age_at(now);
        match self.source {
            PriceSource::Manual => PriceQuality::High,
            PriceSource::Live if age < LIVE_TTL => {
                if self.confidence >= 90 {
                    PriceQuality::High
                } else {
                    PriceQuality::Medium
                }
            }
            PriceSource::Cached if age < CACHED_TTL => {
                if self.confidence >= 70 {
                    PriceQuality::Medium
                } else {
                    PriceQuality::Low
                }
            }
            _ => PriceQuality::Low,
        }
    }

    pub fn quality(&self) -> PriceQuality {
        self.quality_at(Utc::now())
    }

    /// Re-stamp as a cached quote with reduced confidence.
    ///
    /// Each soft refresh costs 20 confidence points, floored at 50.
    pub fn refresh(&self) -> Self {
        Self {
            amount: self.amount,
            currency: self.currency.clone(),
            timestamp: Utc::now(),
            source: PriceSource::Cached,
            provider: self.provider.clone(),
            confidence: self
                .confidence
                .saturating_sub(REFRESH_CONFIDENCE_PENALTY)
                .max(REFRESH_CONFIDENCE_FLOOR),
            ttl_ms: PriceSource::Cached
                .default_ttl()
                .map(|d| d.as_millis() as u64),
        }
    }

    fn ensure_same_currency(&self, other: &Price) -> AppResult<()> {
        if self.currency != other.currency {
            return Err(AppError::validation(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        Ok(())
    }

    /// Percentage change of `self` relative to `other`
    pub fn percentage_difference(&self, other: &Price) -> AppResult<f64> {
        self.ensure_same_currency(other)?;
        if other.amount == 0.0 {
            return Err(AppError::validation("cannot compare against a zero price"));
        }
        Ok((self.amount - other.amount) / other.amount * 100.0)
    }

    pub fn compare(&self, other: &Price) -> AppResult<Ordering> {
        self.ensure_same_currency(other)?;
        Ok(self.amount.total_cmp(&other.amount))
    }

    /// Convert into `target_currency`.
    ///
    /// `rate` is the price of one unit of `target_currency` quoted in this
    /// price's currency (for a USD price and an EUR target: EUR priced in USD).
    pub fn convert_to(&self, rate: &Price, target_currency: &str) -> AppResult<Price> {
        self.ensure_same_currency(rate)?;
        if rate.amount == 0.0 {
            return Err(AppError::invalid_field("rate", "exchange rate must be positive"));
        }
        let converted = Price::new(
            self.amount / rate.amount,
            target_currency,
            self.source,
            self.provider.as_deref(),
            self.confidence.min(rate.confidence),
        )?;
        Ok(converted.with_timestamp(self.timestamp).with_ttl(self.ttl()))
    }

    pub fn format(&self) -> String {
        format!("{:.2} {}", self.amount, self.currency)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}
