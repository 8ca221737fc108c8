//! Balances, rewards and funding requirements.
//!
//! The balance source is queried once per poll tick. The resulting snapshot
//! is shared by every requirement computation of that tick, together with
//! the reward credits read from the per-chain rewards oracles.

use async_trait::async_trait;
use chrono::Utc;
use funding_types::{BalanceSnapshot, ConfigSchema, WalletRef};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

pub mod aggregator;
pub mod client;
pub mod rewards;

pub mod implementations {
	pub mod balances {
		pub mod http;
	}
	pub mod rewards {
		pub mod fixed;
		pub mod http;
	}
}

pub use aggregator::{compute_requirements, AggregationError};
pub use rewards::{RewardsError, RewardsInfo, RewardsInterface, RewardsRegistry, StakingDetails};

/// Errors raised by balance sources and the HTTP client they share.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
	#[error("Transport error: {0}")]
	Transport(String),
	#[error("HTTP {status}: {body}")]
	Http { status: u16, body: String },
	#[error("Failed to decode response: {0}")]
	Decode(String),
}

impl BalanceError {
	/// Transport failures and server errors are worth another attempt.
	pub fn is_retryable(&self) -> bool {
		match self {
			BalanceError::Transport(_) => true,
			BalanceError::Http { status, .. } => *status >= 500,
			BalanceError::Decode(_) => false,
		}
	}
}

/// A source of wallet balances.
#[async_trait]
pub trait BalanceInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Fetches balances of every wallet. Wallets that could not be read are
	/// reported in the snapshot's failures instead of failing the batch.
	async fn get_balances(&self, wallets: &[WalletRef]) -> Result<BalanceSnapshot, BalanceError>;
}

pub struct BalanceService {
	backend: Box<dyn BalanceInterface>,
}

impl BalanceService {
	pub fn new(backend: Box<dyn BalanceInterface>) -> Self {
		Self { backend }
	}

	/// Takes the snapshot for one tick.
	///
	/// Duplicate wallets are queried once. Wallets the source neither reported
	/// nor marked as failed are recorded as failures, so callers never mistake
	/// a silent omission for a zero balance.
	pub async fn fetch_snapshot(
		&self,
		wallets: &[WalletRef],
	) -> Result<BalanceSnapshot, BalanceError> {
		let unique: Vec<WalletRef> = wallets
			.iter()
			.copied()
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect();

		if unique.is_empty() {
			return Ok(BalanceSnapshot::new(Utc::now()));
		}

		let mut snapshot = self.backend.get_balances(&unique).await?;

		for wallet in &unique {
			let reported = snapshot
				.balances
				.get(&wallet.chain)
				.is_some_and(|wallets| wallets.contains_key(&wallet.address));
			if !reported && snapshot.failure(wallet).is_none() {
				snapshot.record_failure(*wallet, "not reported by balance source");
			}
		}

		let failed: usize = snapshot.failures.values().map(|w| w.len()).sum();
		if failed > 0 {
			warn!(
				failed,
				total = unique.len(),
				"Balance snapshot has unavailable wallets"
			);
		}
		debug!(
			wallets = unique.len(),
			stale = snapshot.is_stale(),
			"Balance snapshot fetched"
		);

		Ok(snapshot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use funding_types::{Address, Amount, ChainId, Schema, ValidationError, NATIVE_TOKEN};
	use std::sync::{Arc, Mutex};

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Reports only the first wallet it is asked about and records every call.
	struct PartialSource {
		calls: Arc<Mutex<Vec<usize>>>,
	}

	#[async_trait]
	impl BalanceInterface for PartialSource {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn get_balances(
			&self,
			wallets: &[WalletRef],
		) -> Result<BalanceSnapshot, BalanceError> {
			self.calls.lock().unwrap().push(wallets.len());
			let mut snapshot = BalanceSnapshot::default();
			snapshot.insert(wallets[0], NATIVE_TOKEN, Amount::from(1u64));
			Ok(snapshot)
		}
	}

	#[tokio::test]
	async fn test_fetch_snapshot_dedups_and_flags_omissions() {
		let a = WalletRef {
			chain: ChainId::GNOSIS,
			address: Address::repeat_byte(1),
		};
		let b = WalletRef {
			chain: ChainId::GNOSIS,
			address: Address::repeat_byte(2),
		};
		let calls = Arc::new(Mutex::new(Vec::new()));
		let service = BalanceService::new(Box::new(PartialSource {
			calls: calls.clone(),
		}));

		let snapshot = service.fetch_snapshot(&[a, b, a]).await.unwrap();
		assert_eq!(snapshot.balance(&a, &NATIVE_TOKEN), Amount::from(1u64));
		assert!(snapshot.failure(&a).is_none());
		assert_eq!(snapshot.failure(&b), Some("not reported by balance source"));
		assert_eq!(*calls.lock().unwrap(), vec![2]);
	}

	#[test]
	fn test_retryable_classification() {
		assert!(BalanceError::Transport("reset".into()).is_retryable());
		assert!(BalanceError::Http {
			status: 503,
			body: String::new()
		}
		.is_retryable());
		assert!(!BalanceError::Http {
			status: 404,
			body: String::new()
		}
		.is_retryable());
	}
}
