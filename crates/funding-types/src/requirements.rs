//! Refill and total requirement maps.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Amount, AmountError, ChainId, Holder, TokenBalances};

/// Mapping (chain, holder) -> token -> amount.
///
/// Backed by ordered maps so that equal inputs always serialize to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementMap(BTreeMap<ChainId, BTreeMap<Holder, TokenBalances>>);

/// Additional amount needed right now, net of balances and credits.
pub type RefillRequirement = RequirementMap;

/// Full target per holder, regardless of current balance.
pub type TotalRequirement = RequirementMap;

impl RequirementMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `amount` to the entry, creating it when absent. Zero amounts are
	/// ignored so the map never contains zero entries.
	pub fn add(
		&mut self,
		chain: ChainId,
		holder: Holder,
		token: Address,
		amount: Amount,
	) -> Result<(), AmountError> {
		if amount.is_zero() {
			return Ok(());
		}
		let slot = self
			.0
			.entry(chain)
			.or_default()
			.entry(holder)
			.or_default()
			.entry(token)
			.or_insert(Amount::ZERO);
		*slot = slot.checked_add(amount)?;
		Ok(())
	}

	pub fn get(&self, chain: ChainId, holder: &Holder, token: &Address) -> Amount {
		self.0
			.get(&chain)
			.and_then(|holders| holders.get(holder))
			.and_then(|tokens| tokens.get(token))
			.copied()
			.unwrap_or(Amount::ZERO)
	}

	pub fn holders(&self, chain: ChainId) -> Option<&BTreeMap<Holder, TokenBalances>> {
		self.0.get(&chain)
	}

	pub fn is_empty(&self) -> bool {
		self.iter().next().is_none()
	}

	/// Iterates every (chain, holder, token, amount) entry in key order.
	pub fn iter(&self) -> impl Iterator<Item = (ChainId, &Holder, &Address, Amount)> + '_ {
		self.0.iter().flat_map(|(chain, holders)| {
			holders.iter().flat_map(move |(holder, tokens)| {
				tokens
					.iter()
					.map(move |(token, amount)| (*chain, holder, token, *amount))
			})
		})
	}
}

/// Result of one aggregation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
	pub refill: RefillRequirement,
	pub total: TotalRequirement,
	/// The balances behind this result were flagged stale by the source.
	pub is_stale: bool,
}

impl Requirements {
	/// True when any holder needs more funds.
	pub fn is_refill_required(&self) -> bool {
		!self.refill.is_empty()
	}

	/// The agent may start once nothing is left to refill.
	pub fn allow_start(&self) -> bool {
		self.refill.is_empty()
	}
}

/// Why a credit reduces a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
	/// Accrued but unclaimed rewards, subtracted from the token's target.
	Rewards,
	/// Funds already travelling towards the holder.
	InFlight,
}

/// An amount that counts towards a holder's requirement without being in its balance yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Credit {
	pub chain: ChainId,
	pub holder: Holder,
	pub token: Address,
	pub amount: Amount,
	pub kind: CreditKind,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::NATIVE_TOKEN;

	#[test]
	fn test_add_skips_zero_and_accumulates() {
		let mut map = RequirementMap::new();
		map.add(ChainId::GNOSIS, Holder::SafePlaceholder, NATIVE_TOKEN, Amount::ZERO)
			.unwrap();
		assert!(map.is_empty());

		map.add(ChainId::GNOSIS, Holder::SafePlaceholder, NATIVE_TOKEN, Amount::from(3u64))
			.unwrap();
		map.add(ChainId::GNOSIS, Holder::SafePlaceholder, NATIVE_TOKEN, Amount::from(4u64))
			.unwrap();
		assert_eq!(
			map.get(ChainId::GNOSIS, &Holder::SafePlaceholder, &NATIVE_TOKEN),
			Amount::from(7u64)
		);
		assert_eq!(map.iter().count(), 1);
	}

	#[test]
	fn test_serializes_with_placeholder_key() {
		let mut map = RequirementMap::new();
		map.add(ChainId::BASE, Holder::SafePlaceholder, NATIVE_TOKEN, Amount::from(1u64))
			.unwrap();
		let json = serde_json::to_value(&map).unwrap();
		assert_eq!(
			json["8453"]["master_safe"]["0x0000000000000000000000000000000000000000"],
			"1"
		);
	}
}
