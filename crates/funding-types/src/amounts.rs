//! Token amounts in base units.
//!
//! Amounts are unsigned 256-bit integers. They travel as decimal strings on
//! the wire because 18-decimal balances do not fit in a JSON number.

use alloy_primitives::{Address, U256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel token address for a chain's native currency.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Returns true when the token address denotes the native currency.
pub fn is_native(token: &Address) -> bool {
	*token == NATIVE_TOKEN
}

/// Errors produced while parsing or combining amounts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
	#[error("Invalid amount '{0}'")]
	Invalid(String),
	#[error("Negative amount {0}")]
	Negative(i64),
	#[error("Amount overflow")]
	Overflow,
}

/// Non-negative integer amount of a token in its base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub U256);

impl Amount {
	pub const ZERO: Self = Self(U256::ZERO);

	pub fn new(value: U256) -> Self {
		Self(value)
	}

	pub fn is_zero(&self) -> bool {
		self.0.is_zero()
	}

	pub fn as_u256(&self) -> U256 {
		self.0
	}

	/// Subtraction floored at zero.
	pub fn saturating_sub(self, other: Self) -> Self {
		Self(self.0.saturating_sub(other.0))
	}

	pub fn checked_add(self, other: Self) -> Result<Self, AmountError> {
		self.0
			.checked_add(other.0)
			.map(Self)
			.ok_or(AmountError::Overflow)
	}

	/// Renders the amount in whole units using `decimals`, trimming trailing
	/// zeros from the fractional part. Pure integer arithmetic.
	pub fn format_units(&self, decimals: u8) -> String {
		if decimals == 0 {
			return self.0.to_string();
		}
		let base = U256::from(10u8).pow(U256::from(decimals));
		let whole = self.0 / base;
		let fraction = self.0 % base;
		if fraction.is_zero() {
			return whole.to_string();
		}
		let padded = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
		format!("{}.{}", whole, padded.trim_end_matches('0'))
	}
}

impl From<u64> for Amount {
	fn from(value: u64) -> Self {
		Self(U256::from(value))
	}
}

impl From<u128> for Amount {
	fn from(value: u128) -> Self {
		Self(U256::from(value))
	}
}

impl From<U256> for Amount {
	fn from(value: U256) -> Self {
		Self(value)
	}
}

impl FromStr for Amount {
	type Err = AmountError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();
		if trimmed.is_empty() || trimmed.starts_with('-') {
			return Err(AmountError::Invalid(s.to_string()));
		}
		U256::from_str(trimmed)
			.map(Self)
			.map_err(|_| AmountError::Invalid(s.to_string()))
	}
}

impl fmt::Display for Amount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Amount {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for Amount {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct AmountVisitor;

		impl de::Visitor<'_> for AmountVisitor {
			type Value = Amount;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("a non-negative integer or decimal string")
			}

			fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
				Ok(Amount::from(v))
			}

			fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
				Ok(Amount::from(v))
			}

			fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
				u64::try_from(v)
					.map(Amount::from)
					.map_err(|_| E::custom(AmountError::Negative(v)))
			}

			fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
				v.parse().map_err(E::custom)
			}
		}

		deserializer.deserialize_any(AmountVisitor)
	}
}

/// An amount of one specific token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
	/// Token contract address, or [`NATIVE_TOKEN`].
	pub token: Address,
	pub amount: Amount,
}

impl TokenAmount {
	pub fn new(token: Address, amount: impl Into<Amount>) -> Self {
		Self {
			token,
			amount: amount.into(),
		}
	}

	pub fn native(amount: impl Into<Amount>) -> Self {
		Self::new(NATIVE_TOKEN, amount)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_and_display_large_amounts() {
		let raw = "123456789012345678901234567890";
		let amount: Amount = raw.parse().unwrap();
		assert_eq!(amount.to_string(), raw);
		assert!("-5".parse::<Amount>().is_err());
		assert!("abc".parse::<Amount>().is_err());
	}

	#[test]
	fn test_saturating_sub_floors_at_zero() {
		let small = Amount::from(5u64);
		let big = Amount::from(10u64);
		assert_eq!(small.saturating_sub(big), Amount::ZERO);
		assert_eq!(big.saturating_sub(small), Amount::from(5u64));
	}

	#[test]
	fn test_format_units() {
		let amount = Amount::from(1_500_000_000_000_000_000u128);
		assert_eq!(amount.format_units(18), "1.5");
		assert_eq!(Amount::from(2_000_000u64).format_units(6), "2");
		assert_eq!(Amount::from(5u64).format_units(18), "0.000000000000000005");
		assert_eq!(Amount::from(42u64).format_units(0), "42");
	}

	#[test]
	fn test_serde_accepts_strings_and_numbers() {
		let from_str: Amount = serde_json::from_str("\"1000000000000000000000\"").unwrap();
		assert_eq!(from_str.to_string(), "1000000000000000000000");
		let from_num: Amount = serde_json::from_str("42").unwrap();
		assert_eq!(from_num, Amount::from(42u64));
		assert!(serde_json::from_str::<Amount>("-1").is_err());
		assert_eq!(serde_json::to_string(&from_num).unwrap(), "\"42\"");
	}
}
