//! Balance snapshots.
//!
//! A snapshot is fetched once per poll tick and treated as immutable for
//! every computation in that tick. The previous snapshot is discarded.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Amount, ChainId, WalletRef};

/// Token address to amount.
pub type TokenBalances = BTreeMap<Address, Amount>;

/// Balances of a set of wallets as reported by the balance source.
///
/// Failures are recorded per wallet so a single unreachable wallet does not
/// invalidate the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
	pub balances: BTreeMap<ChainId, BTreeMap<Address, TokenBalances>>,
	#[serde(default)]
	pub failures: BTreeMap<ChainId, BTreeMap<Address, String>>,
	/// A funding transfer to the agent is currently in flight.
	#[serde(default)]
	pub funding_in_progress: bool,
	/// Funding requests were recently served and are in their cooldown window.
	#[serde(default)]
	pub funding_cooldown: bool,
	pub fetched_at: DateTime<Utc>,
}

impl Default for BalanceSnapshot {
	fn default() -> Self {
		Self::new(Utc::now())
	}
}

impl BalanceSnapshot {
	pub fn new(fetched_at: DateTime<Utc>) -> Self {
		Self {
			balances: BTreeMap::new(),
			failures: BTreeMap::new(),
			funding_in_progress: false,
			funding_cooldown: false,
			fetched_at,
		}
	}

	/// Records the balance of one token held by one wallet.
	pub fn insert(&mut self, wallet: WalletRef, token: Address, amount: Amount) {
		self.balances
			.entry(wallet.chain)
			.or_default()
			.entry(wallet.address)
			.or_default()
			.insert(token, amount);
	}

	/// Records that the balances of `wallet` could not be fetched.
	pub fn record_failure(&mut self, wallet: WalletRef, reason: impl Into<String>) {
		self.failures
			.entry(wallet.chain)
			.or_default()
			.insert(wallet.address, reason.into());
	}

	/// The failure reason for `wallet`, if its balances are unavailable.
	pub fn failure(&self, wallet: &WalletRef) -> Option<&str> {
		self.failures
			.get(&wallet.chain)
			.and_then(|wallets| wallets.get(&wallet.address))
			.map(String::as_str)
	}

	/// Balance of `token` held by `wallet`. Tokens the source did not report are zero.
	pub fn balance(&self, wallet: &WalletRef, token: &Address) -> Amount {
		self.balances
			.get(&wallet.chain)
			.and_then(|wallets| wallets.get(&wallet.address))
			.and_then(|tokens| tokens.get(token))
			.copied()
			.unwrap_or(Amount::ZERO)
	}

	/// Whether the data is known to be stale because funding is moving.
	pub fn is_stale(&self) -> bool {
		self.funding_in_progress || self.funding_cooldown
	}
}
