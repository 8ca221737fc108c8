//! Chain identifiers.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// EVM chain id.
///
/// Serialized as a string so it can key TOML tables and JSON objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u64);

impl ChainId {
	pub const ETHEREUM: Self = Self(1);
	pub const OPTIMISM: Self = Self(10);
	pub const GNOSIS: Self = Self(100);
	pub const POLYGON: Self = Self(137);
	pub const BASE: Self = Self(8453);
	pub const MODE: Self = Self(34443);

	/// Human readable name for logs and step titles.
	pub fn name(&self) -> String {
		match *self {
			Self::ETHEREUM => "Ethereum".to_string(),
			Self::OPTIMISM => "Optimism".to_string(),
			Self::GNOSIS => "Gnosis".to_string(),
			Self::POLYGON => "Polygon".to_string(),
			Self::BASE => "Base".to_string(),
			Self::MODE => "Mode".to_string(),
			Self(other) => format!("chain {}", other),
		}
	}
}

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ChainId {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.trim()
			.parse::<u64>()
			.map(ChainId)
			.map_err(|_| format!("Invalid chain ID: {}", s))
	}
}

impl Serialize for ChainId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for ChainId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct ChainIdVisitor;

		impl de::Visitor<'_> for ChainIdVisitor {
			type Value = ChainId;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("a chain id as integer or string")
			}

			fn visit_u64<E: de::Error>(self, v: u64) -> Result<ChainId, E> {
				Ok(ChainId(v))
			}

			fn visit_i64<E: de::Error>(self, v: i64) -> Result<ChainId, E> {
				u64::try_from(v)
					.map(ChainId)
					.map_err(|_| E::custom(format!("Invalid chain ID: {}", v)))
			}

			fn visit_str<E: de::Error>(self, v: &str) -> Result<ChainId, E> {
				v.parse().map_err(E::custom)
			}
		}

		deserializer.deserialize_any(ChainIdVisitor)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	#[test]
	fn test_chain_id_as_map_key() {
		let mut map = BTreeMap::new();
		map.insert(ChainId::GNOSIS, 1u8);
		let json = serde_json::to_string(&map).unwrap();
		assert_eq!(json, r#"{"100":1}"#);
		let back: BTreeMap<ChainId, u8> = serde_json::from_str(&json).unwrap();
		assert_eq!(back.get(&ChainId::GNOSIS), Some(&1));
	}

	#[test]
	fn test_chain_id_from_toml_integer() {
		#[derive(Deserialize)]
		struct Holder {
			chain: ChainId,
		}
		let parsed: Holder = toml::from_str("chain = 8453").unwrap();
		assert_eq!(parsed.chain, ChainId::BASE);
		assert_eq!(parsed.chain.name(), "Base");
	}
}
