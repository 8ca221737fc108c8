//! Static per-agent funding targets.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Amount, ChainId, Holder, TokenAmount, WalletRole};

/// What one wallet of an agent must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTarget {
	pub chain: ChainId,
	pub role: WalletRole,
	/// `None` while the custodial safe has not been created yet.
	#[serde(default)]
	pub address: Option<Address>,
	/// Stated native-token requirement.
	#[serde(default)]
	pub native: Amount,
	#[serde(default)]
	pub stake_deposit: Option<TokenAmount>,
	#[serde(default)]
	pub bond: Option<TokenAmount>,
	/// Arbitrary ERC-20 minimums, token -> amount.
	#[serde(default)]
	pub minimums: BTreeMap<Address, Amount>,
}

impl WalletTarget {
	pub fn holder(&self) -> Holder {
		Holder::from(self.address)
	}
}

/// Funding targets of one agent across every chain it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
	pub wallets: Vec<WalletTarget>,
	/// Monthly operating cost estimate in native token, per chain. Applies to
	/// the custodial safe on that chain.
	#[serde(default)]
	pub monthly_operating_estimate: BTreeMap<ChainId, Amount>,
}

impl TargetConfig {
	pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
		let mut chains: Vec<ChainId> = self.wallets.iter().map(|w| w.chain).collect();
		chains.sort();
		chains.dedup();
		chains.into_iter()
	}

	pub fn monthly_estimate(&self, chain: ChainId) -> Amount {
		self.monthly_operating_estimate
			.get(&chain)
			.copied()
			.unwrap_or(Amount::ZERO)
	}
}
