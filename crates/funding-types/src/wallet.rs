//! Wallets managed by the desktop client.
//!
//! Wallets are provisioned elsewhere; this core only reads them.

use alloy_primitives::Address;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::ChainId;

/// Key under which requirements for a not-yet-created custodial safe are reported.
pub const SAFE_PLACEHOLDER: &str = "master_safe";

/// Role a wallet plays for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletRole {
	/// Externally-owned account controlled by the user.
	MasterExternal,
	/// The user's custodial safe on a chain.
	MasterCustodial,
	/// The agent's own custodial safe.
	ServiceCustodial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
	pub role: WalletRole,
	pub chain: ChainId,
	pub address: Address,
	/// Backup owner of a custodial wallet, if one was registered.
	pub backup_owner: Option<Address>,
}

impl Wallet {
	pub fn wallet_ref(&self) -> WalletRef {
		WalletRef {
			chain: self.chain,
			address: self.address,
		}
	}
}

/// A (chain, address) pair as queried from the balance source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletRef {
	pub chain: ChainId,
	pub address: Address,
}

impl fmt::Display for WalletRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.chain, self.address)
	}
}

/// Owner of a requirement entry: a known address, or the placeholder for a
/// custodial safe whose address is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Holder {
	Wallet(Address),
	SafePlaceholder,
}

impl Holder {
	pub fn address(&self) -> Option<Address> {
		match self {
			Holder::Wallet(address) => Some(*address),
			Holder::SafePlaceholder => None,
		}
	}
}

impl From<Option<Address>> for Holder {
	fn from(address: Option<Address>) -> Self {
		address.map(Holder::Wallet).unwrap_or(Holder::SafePlaceholder)
	}
}

impl fmt::Display for Holder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Holder::Wallet(address) => write!(f, "{}", address),
			Holder::SafePlaceholder => f.write_str(SAFE_PLACEHOLDER),
		}
	}
}

impl FromStr for Holder {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == SAFE_PLACEHOLDER {
			return Ok(Holder::SafePlaceholder);
		}
		Address::from_str(s)
			.map(Holder::Wallet)
			.map_err(|e| format!("Invalid holder '{}': {}", s, e))
	}
}

impl Serialize for Holder {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Holder {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(de::Error::custom)
	}
}
