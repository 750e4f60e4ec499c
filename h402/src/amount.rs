//! Token amounts in the smallest unit of the asset.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// An unsigned amount in the smallest token unit (wei, or 10^-6 USDC).
///
/// Serialized as a base-10 string so that values above 2^53 survive JSON
/// parsers that only have doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

/// Returned when a string is not a non-negative base-10 integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    /// The string was empty.
    #[error("amount is empty")]
    Empty,
    /// The string had a leading minus sign.
    #[error("amount must not be negative: {0}")]
    Negative(String),
    /// The string contained something other than ASCII digits.
    #[error("amount is not a base-10 integer: {0}")]
    NotNumeric(String),
    /// The value does not fit in 256 bits.
    #[error("amount overflows 256 bits: {0}")]
    Overflow(String),
}

impl TokenAmount {
    /// Zero.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Returns the inner [`U256`].
    #[must_use]
    pub const fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<u128> for TokenAmount {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountParseError::Negative(s.to_owned()));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::NotNumeric(s.to_owned()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| AmountParseError::Overflow(s.to_owned()))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!("1000".parse::<TokenAmount>().unwrap(), TokenAmount::from(1000u64));
        assert_eq!("0".parse::<TokenAmount>().unwrap(), TokenAmount::ZERO);
        let big = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(big.parse::<TokenAmount>().unwrap().0, U256::MAX);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!("".parse::<TokenAmount>(), Err(AmountParseError::Empty));
        assert!(matches!(
            "-1".parse::<TokenAmount>(),
            Err(AmountParseError::Negative(_))
        ));
        assert!(matches!(
            "1.5".parse::<TokenAmount>(),
            Err(AmountParseError::NotNumeric(_))
        ));
        assert!(matches!(
            "0x10".parse::<TokenAmount>(),
            Err(AmountParseError::NotNumeric(_))
        ));
        assert!(matches!(
            "115792089237316195423570985008687907853269984665640564039457584007913129639936"
                .parse::<TokenAmount>(),
            Err(AmountParseError::Overflow(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let amount = TokenAmount::from(1_000_001u64);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"1000001\"");
        assert!(serde_json::from_str::<TokenAmount>("1000001").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"-3\"").is_err());
    }
}
