//! Token amounts in integer minor units
//!
//! Prices, payment values and earnings are all `u128` counts of the asset's
//! smallest unit (e.g. 1 USDC = 1_000_000 minor units at 6 decimals). Conversion
//! to and from human-readable decimal strings is exact: no floating point is
//! involved at any step.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest number of fractional digits supported by `format_units`/`parse_units`
pub const MAX_DECIMALS: u8 = 18;

/// Amount errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("empty amount string")]
    Empty,

    #[error("invalid amount string: {0}")]
    Invalid(String),

    #[error("too many fractional digits: {digits} exceeds {decimals} decimals")]
    TooManyDecimals { digits: usize, decimals: u8 },

    #[error("unsupported decimals: {0} (max {MAX_DECIMALS})")]
    UnsupportedDecimals(u8),

    #[error("amount overflow")]
    Overflow,
}

pub type AmountResult<T> = Result<T, AmountError>;

/// A non-negative token amount in minor units.
///
/// Serialized as a base-10 string so JSON consumers never lose precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub fn new(minor_units: u128) -> Self {
        Self(minor_units)
    }

    pub fn minor_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_mul(self, factor: u128) -> Self {
        Self(self.0.saturating_mul(factor))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for TokenAmount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl From<u64> for TokenAmount {
    fn from(v: u64) -> Self {
        Self(v as u128)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    /// Parses a base-10 integer of minor units (no decimal point).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_units(s, 0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = TokenAmount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a base-10 string or unsigned integer of minor units")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TokenAmount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<TokenAmount, E> {
                Ok(TokenAmount::from(v))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

fn scale(decimals: u8) -> AmountResult<u128> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }
    Ok(10u128.pow(decimals as u32))
}

/// Render minor units as a decimal string with `decimals` fractional digits.
///
/// Trailing fractional zeros are trimmed, and a whole number has no decimal point:
/// `format_units(1_500_000, 6) == "1.5"`, `format_units(2_000_000, 6) == "2"`.
pub fn format_units(amount: TokenAmount, decimals: u8) -> AmountResult<String> {
    let unit = scale(decimals)?;
    let whole = amount.0 / unit;
    let frac = amount.0 % unit;

    if frac == 0 {
        return Ok(whole.to_string());
    }

    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    Ok(format!("{}.{}", whole, frac.trim_end_matches('0')))
}

/// Parse a decimal string into minor units at `decimals` precision.
///
/// Accepts `"12"`, `"12.5"`, `"0.000001"`. Rejects signs, exponents, whitespace,
/// a bare or trailing `.`, and more fractional digits than `decimals`.
pub fn parse_units(text: &str, decimals: u8) -> AmountResult<TokenAmount> {
    let unit = scale(decimals)?;
    if text.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (text, None),
    };

    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(whole) {
        return Err(AmountError::Invalid(text.to_string()));
    }

    let whole_value = whole
        .parse::<u128>()
        .map_err(|_| AmountError::Overflow)?
        .checked_mul(unit)
        .ok_or(AmountError::Overflow)?;

    let frac_value = match frac {
        None => 0,
        Some(f) => {
            if !is_digits(f) {
                return Err(AmountError::Invalid(text.to_string()));
            }
            if f.len() > decimals as usize {
                return Err(AmountError::TooManyDecimals {
                    digits: f.len(),
                    decimals,
                });
            }
            let padding = 10u128.pow((decimals as usize - f.len()) as u32);
            f.parse::<u128>().map_err(|_| AmountError::Overflow)? * padding
        }
    };

    whole_value
        .checked_add(frac_value)
        .map(TokenAmount)
        .ok_or(AmountError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(TokenAmount(1_500_000), 6).unwrap(), "1.5");
        assert_eq!(format_units(TokenAmount(2_000_000), 6).unwrap(), "2");
        assert_eq!(format_units(TokenAmount(1), 6).unwrap(), "0.000001");
        assert_eq!(format_units(TokenAmount(0), 18).unwrap(), "0");
        assert_eq!(format_units(TokenAmount(42), 0).unwrap(), "42");
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.5", 6).unwrap(), TokenAmount(1_500_000));
        assert_eq!(parse_units("0.000001", 6).unwrap(), TokenAmount(1));
        assert_eq!(parse_units("10", 2).unwrap(), TokenAmount(1_000));
        assert_eq!(
            parse_units("1", 18).unwrap(),
            TokenAmount(1_000_000_000_000_000_000)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_units("", 6), Err(AmountError::Empty));
        assert!(matches!(parse_units("-1", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units("1.", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units(".5", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units("1e5", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units(" 1", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units("1.2.3", 6), Err(AmountError::Invalid(_))));
        assert_eq!(
            parse_units("0.1234567", 6),
            Err(AmountError::TooManyDecimals { digits: 7, decimals: 6 })
        );
        assert_eq!(parse_units("1", 19), Err(AmountError::UnsupportedDecimals(19)));
        assert_eq!(
            parse_units("999999999999999999999999999999999999999", 18),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn test_round_trip_across_decimals() {
        let samples = ["0", "1", "7.25", "123456.000001", "0.5", "340282366920938"];
        for decimals in 0..=MAX_DECIMALS {
            for s in samples {
                let Ok(parsed) = parse_units(s, decimals) else {
                    // fractional samples are too precise for small decimals
                    continue;
                };
                assert_eq!(format_units(parsed, decimals).unwrap(), s, "decimals={decimals}");
            }
        }
    }

    #[test]
    fn test_round_trip_normalises_trailing_zeros() {
        let parsed = parse_units("2.500", 6).unwrap();
        assert_eq!(format_units(parsed, 6).unwrap(), "2.5");
        let parsed = parse_units("3.000", 6).unwrap();
        assert_eq!(format_units(parsed, 6).unwrap(), "3");
    }

    #[test]
    fn test_serde_as_string() {
        let amount = TokenAmount(1_000_000_000_000_000_000_000);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000000000\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
        let from_number: TokenAmount = serde_json::from_str("250").unwrap();
        assert_eq!(from_number, TokenAmount(250));
    }
}
