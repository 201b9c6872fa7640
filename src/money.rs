//! Asset Amount Module
//!
//! Precision-safe amounts for on-chain assets. Every `AssetValue` is stored
//! as a base-unit integer ("wei") plus the number of decimals it is scaled by.
//! All conversions between human-readable strings and base units go through
//! [`parse_amount`] and [`format_amount`].
//!
//! ## Internal Representation
//! - Amounts are `BigUint` base units, so 18- and 30-decimal assets never overflow
//! - `decimals` is bounded to `0..=30`
//! - Arithmetic is only defined between values with the same symbol and decimals
//!
//! ## Usage
//! ```rust
//! use portfolio_core::money::AssetValue;
//!
//! let eth = AssetValue::from_wei("1500000000000000000", "ETH", Some(18))?;
//! assert_eq!(eth.amount(), "1.5");
//! # Ok::<(), portfolio_core::error::AppError>(())
//! ```

use num_bigint::BigUint;
use num_traits::{One, Zero};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::AppResult;

/// Largest supported `decimals`
pub const MAX_DECIMALS: u32 = 30;

/// Decimals used when the symbol is not in the built-in table
pub const DEFAULT_DECIMALS: u32 = 18;

/// Fixed-point scale applied to the scalar operand of `multiply`/`divide`
pub const SCALAR_DECIMALS: u32 = 18;

/// Upper bound on fractional digits rendered by `format`
pub const MAX_DISPLAY_DECIMALS: u32 = 8;

static SYMBOL_DECIMALS: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        ("ETH", 18),
        ("WETH", 18),
        ("BTC", 8),
        ("WBTC", 8),
        ("SOL", 9),
        ("USDC", 6),
        ("USDT", 6),
        ("DAI", 18),
        ("MATIC", 18),
        ("POL", 18),
        ("BNB", 18),
        ("AVAX", 18),
        ("ARB", 18),
        ("OP", 18),
        ("LINK", 18),
        ("UNI", 18),
    ])
});

/// Default decimals for a symbol (case-insensitive), falling back to 18
pub fn default_decimals(symbol: &str) -> u32 {
    SYMBOL_DECIMALS
        .get(symbol.trim().to_uppercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_DECIMALS)
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Decimals {0} out of range (max 30)")]
    InvalidDecimals(u32),

    #[error("Asset symbol must not be empty")]
    EmptySymbol,

    #[error("Amount must be a finite, non-negative number: {0}")]
    InvalidAmount(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Symbol mismatch: {left} vs {right}")]
    SymbolMismatch { left: String, right: String },

    #[error("Decimals mismatch: {left} vs {right}")]
    DecimalsMismatch { left: u32, right: u32 },

    #[error("Subtraction would go below zero")]
    Underflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Amount {0} does not fit in a Decimal")]
    Overflow(String),
}

// ============================================================================
// Parse / Format: String <-> Base Units
// ============================================================================

/// Convert a human-readable amount to base units.
///
/// The fractional part is right-padded with zeros or truncated to exactly
/// `decimals` digits. Signs, exponents and separators are rejected.
pub fn parse_amount(amount: &str, decimals: u32) -> Result<BigUint, MoneyError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if amount.starts_with('-') {
        return Err(MoneyError::InvalidAmount(amount.to_string()));
    }

    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(MoneyError::InvalidFormat(amount.to_string()));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(amount.to_string()));
    }

    let width = decimals as usize;
    let mut digits = String::with_capacity(whole.len() + width);
    digits.push_str(whole);
    if frac.len() >= width {
        digits.push_str(&frac[..width]);
    } else {
        digits.push_str(frac);
        digits.extend(std::iter::repeat_n('0', width - frac.len()));
    }
    if digits.is_empty() {
        return Ok(BigUint::zero());
    }

    BigUint::from_str(&digits).map_err(|e| MoneyError::InvalidFormat(e.to_string()))
}

/// Render base units as a decimal string without trailing fractional zeros
pub fn format_amount(wei: &BigUint, decimals: u32) -> String {
    let raw = wei.to_string();
    if decimals == 0 {
        return raw;
    }

    let width = decimals as usize;
    let padded = if raw.len() <= width {
        format!("{}{}", "0".repeat(width + 1 - raw.len()), raw)
    } else {
        raw
    };
    let (whole, frac) = padded.split_at(padded.len() - width);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

/// Parse a base-unit integer string; fractional input is rejected
pub fn parse_wei(wei: &str) -> Result<BigUint, MoneyError> {
    let wei = wei.trim();
    if wei.contains('.') {
        return Err(MoneyError::InvalidFormat(format!("base units must be an integer: {wei}")));
    }
    parse_amount(wei, 0)
}

fn ten_pow(exp: u32) -> BigUint {
    BigUint::from(10u32).pow(exp)
}

fn check_decimals(decimals: u32) -> Result<u32, MoneyError> {
    if decimals > MAX_DECIMALS {
        Err(MoneyError::InvalidDecimals(decimals))
    } else {
        Ok(decimals)
    }
}

fn canonical_symbol(symbol: &str) -> Result<String, MoneyError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(MoneyError::EmptySymbol);
    }
    Ok(symbol.to_uppercase())
}

fn scalar_units(factor: Decimal) -> Result<BigUint, MoneyError> {
    if factor.is_sign_negative() && !factor.is_zero() {
        return Err(MoneyError::InvalidAmount(factor.to_string()));
    }
    parse_amount(&factor.abs().to_string(), SCALAR_DECIMALS)
}

// ============================================================================
// AssetValue
// ============================================================================

/// An immutable amount of a single asset.
///
/// Equality and hashing are field-wise: two values are equal only when they
/// carry the same base units, decimals, symbol and contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AssetValueRecord", into = "AssetValueRecord")]
pub struct AssetValue {
    wei: BigUint,
    decimals: u32,
    symbol: String,
    contract_address: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetValueRecord {
    symbol: String,
    decimals: u32,
    wei: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contract_address: Option<String>,
}

impl TryFrom<AssetValueRecord> for AssetValue {
    type Error = MoneyError;

    fn try_from(r: AssetValueRecord) -> Result<Self, Self::Error> {
        let value = AssetValue::build(parse_wei(&r.wei)?, &r.symbol, r.decimals)?;
        Ok(match r.contract_address {
            Some(addr) => value.with_contract_address(addr),
            None => value,
        })
    }
}

impl From<AssetValue> for AssetValueRecord {
    fn from(v: AssetValue) -> Self {
        AssetValueRecord {
            wei: v.wei.to_string(),
            symbol: v.symbol,
            decimals: v.decimals,
            contract_address: v.contract_address,
        }
    }
}

impl AssetValue {
    fn build(wei: BigUint, symbol: &str, decimals: u32) -> Result<Self, MoneyError> {
        Ok(Self {
            wei,
            decimals: check_decimals(decimals)?,
            symbol: canonical_symbol(symbol)?,
            contract_address: None,
        })
    }

    /// Value from a human-readable amount such as `"1.5"`
    pub fn from_amount(amount: &str, symbol: &str, decimals: Option<u32>) -> AppResult<Self> {
        let decimals = check_decimals(decimals.unwrap_or_else(|| default_decimals(symbol)))?;
        let wei = parse_amount(amount, decimals)?;
        Ok(Self::build(wei, symbol, decimals)?)
    }

    /// Value from a floating-point amount; NaN, infinities and negatives are rejected
    pub fn from_float(amount: f64, symbol: &str, decimals: Option<u32>) -> AppResult<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MoneyError::InvalidAmount(amount.to_string()).into());
        }
        // f64 Display never uses exponent notation
        Self::from_amount(&amount.to_string(), symbol, decimals)
    }

    pub fn from_decimal(amount: Decimal, symbol: &str, decimals: Option<u32>) -> AppResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::InvalidAmount(amount.to_string()).into());
        }
        Self::from_amount(&amount.abs().to_string(), symbol, decimals)
    }

    /// Value from a base-unit integer string such as `"1500000000000000000"`
    pub fn from_wei(wei: &str, symbol: &str, decimals: Option<u32>) -> AppResult<Self> {
        let decimals = check_decimals(decimals.unwrap_or_else(|| default_decimals(symbol)))?;
        let wei = parse_wei(wei)?;
        Ok(Self::build(wei, symbol, decimals)?)
    }

    pub fn zero(symbol: &str, decimals: Option<u32>) -> AppResult<Self> {
        let decimals = decimals.unwrap_or_else(|| default_decimals(symbol));
        Ok(Self::build(BigUint::zero(), symbol, decimals)?)
    }

    pub fn with_contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }

    fn derive(&self, wei: BigUint) -> Self {
        Self {
            wei,
            decimals: self.decimals,
            symbol: self.symbol.clone(),
            contract_address: self.contract_address.clone(),
        }
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub const fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn contract_address(&self) -> Option<&str> {
        self.contract_address.as_deref()
    }

    /// Base units as an integer
    pub fn to_big_int(&self) -> &BigUint {
        &self.wei
    }

    /// Base units as a decimal string
    pub fn to_wei(&self) -> String {
        self.wei.to_string()
    }

    /// Human-readable amount without trailing zeros
    pub fn amount(&self) -> String {
        format_amount(&self.wei, self.decimals)
    }

    /// Lossy floating-point view of the amount, for value calculations
    pub fn amount_as_number(&self) -> f64 {
        self.amount().parse().unwrap_or(0.0)
    }

    pub fn to_decimal(&self) -> AppResult<Decimal> {
        let amount = self.amount();
        Decimal::from_str(&amount).map_err(|_| MoneyError::Overflow(amount).into())
    }

    pub fn is_zero(&self) -> bool {
        self.wei.is_zero()
    }

    // ============================================================
    // ARITHMETIC (new instance per operation)
    // ============================================================

    fn ensure_compatible(&self, other: &AssetValue) -> Result<(), MoneyError> {
        if self.symbol != other.symbol {
            return Err(MoneyError::SymbolMismatch {
                left: self.symbol.clone(),
                right: other.symbol.clone(),
            });
        }
        if self.decimals != other.decimals {
            return Err(MoneyError::DecimalsMismatch {
                left: self.decimals,
                right: other.decimals,
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &AssetValue) -> AppResult<Self> {
        self.ensure_compatible(other)?;
        Ok(self.derive(&self.wei + &other.wei))
    }

    /// Subtraction below zero is an error, never clamped
    pub fn subtract(&self, other: &AssetValue) -> AppResult<Self> {
        self.ensure_compatible(other)?;
        if other.wei > self.wei {
            return Err(MoneyError::Underflow.into());
        }
        Ok(self.derive(&self.wei - &other.wei))
    }

    pub fn compare(&self, other: &AssetValue) -> AppResult<Ordering> {
        self.ensure_compatible(other)?;
        Ok(self.wei.cmp(&other.wei))
    }

    /// Multiply by a scalar. The scalar keeps at most 18 fractional digits.
    pub fn multiply(&self, factor: Decimal) -> AppResult<Self> {
        let scaled = scalar_units(factor)?;
        Ok(self.derive(&self.wei * scaled / ten_pow(SCALAR_DECIMALS)))
    }

    /// Divide by a scalar. The scalar keeps at most 18 fractional digits.
    pub fn divide(&self, divisor: Decimal) -> AppResult<Self> {
        let scaled = scalar_units(divisor)?;
        if scaled.is_zero() {
            return Err(MoneyError::DivisionByZero.into());
        }
        Ok(self.derive(&self.wei * ten_pow(SCALAR_DECIMALS) / scaled))
    }

    /// Display string with at most `min(decimals, 8)` fractional digits (truncated)
    pub fn format(&self) -> String {
        let shown = self.decimals.min(MAX_DISPLAY_DECIMALS);
        let cut = ten_pow(self.decimals - shown);
        let truncated = if cut.is_one() {
            self.wei.clone()
        } else {
            &self.wei / cut
        };
        format!("{} {}", format_amount(&truncated, shown), self.symbol)
    }
}

impl fmt::Display for AssetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn eth(amount: &str) -> AssetValue {
        AssetValue::from_amount(amount, "ETH", None).unwrap()
    }

    #[test]
    fn test_from_wei_renders_amount() {
        let v = AssetValue::from_wei("1500000000000000000", "ETH", Some(18)).unwrap();
        assert_eq!(v.amount(), "1.5");
        assert_eq!(v.symbol(), "ETH");
        assert_eq!(v.decimals(), 18);
    }

    #[test]
    fn test_wei_roundtrip() {
        for (wei, decimals) in [
            ("0", 18),
            ("1", 18),
            ("123456789", 6),
            ("100000000", 8),
            ("999999999999999999999999999999999", 30),
            ("42", 0),
        ] {
            let v = AssetValue::from_wei(wei, "TKN", Some(decimals)).unwrap();
            assert_eq!(v.to_wei(), wei, "decimals {}", decimals);
        }
    }

    #[test]
    fn test_default_decimals_table() {
        assert_eq!(default_decimals("usdc"), 6);
        assert_eq!(default_decimals("BTC"), 8);
        assert_eq!(default_decimals("UNKNOWN"), DEFAULT_DECIMALS);

        let usdc = AssetValue::from_amount("12.5", "usdc", None).unwrap();
        assert_eq!(usdc.decimals(), 6);
        assert_eq!(usdc.to_wei(), "12500000");
        assert_eq!(usdc.symbol(), "USDC");
    }

    #[test]
    fn test_fraction_is_truncated_to_decimals() {
        let v = AssetValue::from_amount("1.1234567", "USDC", None).unwrap();
        assert_eq!(v.to_wei(), "1123456");
        assert_eq!(v.amount(), "1.123456");
    }

    #[test]
    fn test_invalid_inputs() {
        for bad in ["", "-1", "1.2.3", "1e5", "abc", "1,000", "."] {
            assert!(
                AssetValue::from_amount(bad, "ETH", None).is_err(),
                "should reject {:?}",
                bad
            );
        }
        assert!(AssetValue::from_amount("1", "  ", None).is_err());
        assert!(AssetValue::from_amount("1", "ETH", Some(31)).is_err());
        assert!(AssetValue::from_float(f64::NAN, "ETH", None).is_err());
        assert!(AssetValue::from_float(-0.5, "ETH", None).is_err());
        assert!(AssetValue::from_wei("1.5", "ETH", None).is_err());
    }

    #[test]
    fn test_from_float_and_decimal() {
        let v = AssetValue::from_float(0.25, "BTC", None).unwrap();
        assert_eq!(v.to_wei(), "25000000");

        let d = AssetValue::from_decimal(Decimal::new(15, 1), "SOL", None).unwrap();
        assert_eq!(d.to_wei(), "1500000000");
        assert_eq!(d.to_decimal().unwrap(), Decimal::new(15, 1));
    }

    #[test]
    fn test_add_subtract() {
        let a = eth("1.5");
        let b = eth("0.25");
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.amount(), "1.75");
        assert_eq!(sum.subtract(&b).unwrap(), a);

        assert!(matches!(b.subtract(&a), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_mismatched_arithmetic_fails() {
        let a = eth("1");
        let btc = AssetValue::from_amount("1", "BTC", None).unwrap();
        let eth_6 = AssetValue::from_amount("1", "ETH", Some(6)).unwrap();

        assert!(a.add(&btc).is_err());
        assert!(a.subtract(&btc).is_err());
        assert!(a.compare(&btc).is_err());
        assert!(a.add(&eth_6).is_err());
        assert!(a.compare(&eth_6).is_err());
    }

    #[test]
    fn test_compare() {
        assert_eq!(eth("1").compare(&eth("2")).unwrap(), Ordering::Less);
        assert_eq!(eth("2").compare(&eth("2.0")).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_multiply_divide_scalar() {
        let v = eth("10");
        assert_eq!(v.multiply(Decimal::new(15, 1)).unwrap().amount(), "15");
        assert_eq!(v.divide(Decimal::new(4, 0)).unwrap().amount(), "2.5");
        assert!(v.divide(Decimal::ZERO).is_err());
        assert!(v.multiply(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn test_format_limits_fraction_digits() {
        let v = AssetValue::from_wei("1234567891234567891", "ETH", Some(18)).unwrap();
        assert_eq!(v.format(), "1.23456789 ETH");

        let usdc = AssetValue::from_amount("3.5", "USDC", None).unwrap();
        assert_eq!(usdc.to_string(), "3.5 USDC");

        let zero = AssetValue::zero("BTC", None).unwrap();
        assert_eq!(zero.format(), "0 BTC");
        assert!(zero.is_zero());
    }

    #[test]
    fn test_serde_keeps_base_units() {
        let v = AssetValue::from_amount("2.000000000000000001", "ETH", None)
            .unwrap()
            .with_contract_address("0xabc");
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"wei\":\"2000000000000000001\""));
        let back: AssetValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.contract_address(), Some("0xabc"));
    }
}
