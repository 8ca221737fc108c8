//! Read-only staking rewards oracles, one per chain.
//!
//! Each chain's staking contracts expose the same two reads: accrued rewards
//! and staking details. The registry selects the implementation configured
//! for a chain and turns accrued rewards into credits for the aggregator.

use async_trait::async_trait;
use funding_types::{
	Address, Amount, ChainId, ConfigSchema, Credit, CreditKind, Holder,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RewardsError {
	#[error("Rewards unavailable on chain {chain}: {message}")]
	Unavailable { chain: ChainId, message: String },
}

/// Rewards accrued by an agent's service, not yet claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsInfo {
	pub token: Address,
	pub accrued: Amount,
	/// The service met its activity target for the current epoch.
	#[serde(default)]
	pub is_eligible: bool,
}

/// Parameters of the staking program an agent is enrolled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingDetails {
	pub staking_program: String,
	pub token: Address,
	pub min_staking_deposit: Amount,
	#[serde(default)]
	pub bond: Amount,
}

#[async_trait]
pub trait RewardsInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn rewards_info(&self, agent_id: &str) -> Result<RewardsInfo, RewardsError>;

	async fn staking_details(&self, agent_id: &str) -> Result<StakingDetails, RewardsError>;
}

/// What the registry learned about an agent in one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardsSummary {
	pub credits: Vec<Credit>,
	/// Every configured oracle reports the agent as eligible. No oracles means
	/// there is no eligibility condition to wait for.
	pub is_eligible: bool,
}

#[derive(Default)]
pub struct RewardsRegistry {
	oracles: BTreeMap<ChainId, Box<dyn RewardsInterface>>,
}

impl RewardsRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, chain: ChainId, oracle: Box<dyn RewardsInterface>) {
		self.oracles.insert(chain, oracle);
	}

	pub fn for_chain(&self, chain: ChainId) -> Option<&dyn RewardsInterface> {
		self.oracles.get(&chain).map(|oracle| oracle.as_ref())
	}

	pub fn is_empty(&self) -> bool {
		self.oracles.is_empty()
	}

	/// Reads accrued rewards from every oracle and credits them to `holder`,
	/// the custodial safe that receives claimed rewards.
	pub async fn collect(
		&self,
		agent_id: &str,
		holder: Holder,
	) -> Result<RewardsSummary, RewardsError> {
		let mut summary = RewardsSummary {
			credits: Vec::new(),
			is_eligible: true,
		};

		for (chain, oracle) in &self.oracles {
			let info = oracle.rewards_info(agent_id).await?;
			summary.is_eligible &= info.is_eligible;
			if !info.accrued.is_zero() {
				summary.credits.push(Credit {
					chain: *chain,
					holder,
					token: info.token,
					amount: info.accrued,
					kind: CreditKind::Rewards,
				});
			}
		}

		Ok(summary)
	}

	/// Staking details of every chain that has an oracle. Chains whose oracle
	/// fails are skipped with a warning.
	pub async fn staking_details(&self, agent_id: &str) -> BTreeMap<ChainId, StakingDetails> {
		let mut details = BTreeMap::new();
		for (chain, oracle) in &self.oracles {
			match oracle.staking_details(agent_id).await {
				Ok(found) => {
					details.insert(*chain, found);
				}
				Err(e) => warn!(%chain, agent_id, "Failed to read staking details: {}", e),
			}
		}
		details
	}
}
