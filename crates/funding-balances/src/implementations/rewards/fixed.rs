//! Rewards oracle with values taken straight from configuration.
//!
//! Used for chains without a staking program and in local setups.

use async_trait::async_trait;
use funding_types::{
	Address, Amount, ChainId, ConfigSchema, Field, FieldType, Schema, ValidationError,
	NATIVE_TOKEN,
};
use std::str::FromStr;

use crate::rewards::{RewardsError, RewardsInfo, RewardsInterface, StakingDetails};

pub struct FixedRewards {
	pub chain: ChainId,
	pub info: RewardsInfo,
	pub staking: Option<StakingDetails>,
}

pub struct FixedRewardsSchema;

impl ConfigSchema for FixedRewardsSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("token", FieldType::Address),
				Field::new("accrued", FieldType::Amount),
				Field::new("eligible", FieldType::Boolean),
				Field::new("staking_program", FieldType::String),
				Field::new("min_staking_deposit", FieldType::Amount),
				Field::new("bond", FieldType::Amount),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl RewardsInterface for FixedRewards {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FixedRewardsSchema)
	}

	async fn rewards_info(&self, _agent_id: &str) -> Result<RewardsInfo, RewardsError> {
		Ok(self.info.clone())
	}

	async fn staking_details(&self, _agent_id: &str) -> Result<StakingDetails, RewardsError> {
		self.staking.clone().ok_or_else(|| RewardsError::Unavailable {
			chain: self.chain,
			message: "no staking program configured".to_string(),
		})
	}
}

fn amount(config: &toml::Value, key: &str) -> Amount {
	match config.get(key) {
		Some(toml::Value::Integer(value)) => u64::try_from(*value)
			.map(Amount::from)
			.unwrap_or(Amount::ZERO),
		Some(toml::Value::String(value)) => Amount::from_str(value).unwrap_or(Amount::ZERO),
		_ => Amount::ZERO,
	}
}

/// Factory function to create a fixed rewards oracle from configuration.
///
/// Configuration parameters:
/// - `token`: reward token (default: native)
/// - `accrued`: accrued rewards in base units (default: 0)
/// - `eligible`: whether the agent is eligible this epoch (default: false)
/// - `staking_program`, `min_staking_deposit`, `bond`: staking details, only
///   reported when `staking_program` is set
pub fn create_oracle(chain: ChainId, config: &toml::Value) -> Box<dyn RewardsInterface> {
	let token = config
		.get("token")
		.and_then(|v| v.as_str())
		.and_then(|v| Address::from_str(v).ok())
		.unwrap_or(NATIVE_TOKEN);

	let staking = config
		.get("staking_program")
		.and_then(|v| v.as_str())
		.map(|program| StakingDetails {
			staking_program: program.to_string(),
			token,
			min_staking_deposit: amount(config, "min_staking_deposit"),
			bond: amount(config, "bond"),
		});

	Box::new(FixedRewards {
		chain,
		info: RewardsInfo {
			token,
			accrued: amount(config, "accrued"),
			is_eligible: config
				.get("eligible")
				.and_then(|v| v.as_bool())
				.unwrap_or(false),
		},
		staking,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_factory_reads_table() {
		let config: toml::Value = toml::from_str(
			r#"
			token = "0xcE11e14225575945b8E6Dc0D4F2dD4C570f79d9f"
			accrued = "1500"
			eligible = true
			staking_program = "pearl_beta"
			min_staking_deposit = 20
			"#,
		)
		.unwrap();
		assert!(FixedRewardsSchema.validate(&config).is_ok());

		let oracle = create_oracle(ChainId::GNOSIS, &config);
		let info = oracle.rewards_info("trader").await.unwrap();
		assert_eq!(info.accrued, Amount::from(1500u64));
		assert!(info.is_eligible);

		let staking = oracle.staking_details("trader").await.unwrap();
		assert_eq!(staking.staking_program, "pearl_beta");
		assert_eq!(staking.min_staking_deposit, Amount::from(20u64));
		assert_eq!(staking.bond, Amount::ZERO);
	}
}
