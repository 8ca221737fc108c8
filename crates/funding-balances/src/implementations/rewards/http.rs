//! Rewards oracle that reads the middleware's staking endpoints.
//!
//! - `GET {base_url}/staking/{chain}/{agent_id}/rewards`
//! - `GET {base_url}/staking/{chain}/{agent_id}/details`

use async_trait::async_trait;
use funding_types::{ChainId, ConfigSchema, Field, FieldType, Schema, ValidationError};

use crate::client::HttpClient;
use crate::rewards::{RewardsError, RewardsInfo, RewardsInterface, StakingDetails};

pub struct HttpRewards {
	chain: ChainId,
	client: HttpClient,
}

impl HttpRewards {
	pub fn new(chain: ChainId, client: HttpClient) -> Self {
		Self { chain, client }
	}

	fn path(&self, agent_id: &str, resource: &str) -> String {
		format!("staking/{}/{}/{}", self.chain, agent_id, resource)
	}

	fn unavailable(&self, error: impl ToString) -> RewardsError {
		RewardsError::Unavailable {
			chain: self.chain,
			message: error.to_string(),
		}
	}
}

pub struct HttpRewardsSchema;

impl ConfigSchema for HttpRewardsSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::Url)],
			vec![
				Field::new(
					"request_timeout_secs",
					FieldType::Integer {
						min: Some(1),
						max: Some(600),
					},
				),
				Field::new(
					"max_retries",
					FieldType::Integer {
						min: Some(0),
						max: Some(10),
					},
				),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl RewardsInterface for HttpRewards {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpRewardsSchema)
	}

	async fn rewards_info(&self, agent_id: &str) -> Result<RewardsInfo, RewardsError> {
		self.client
			.get_json(&self.path(agent_id, "rewards"))
			.await
			.map_err(|e| self.unavailable(e))
	}

	async fn staking_details(&self, agent_id: &str) -> Result<StakingDetails, RewardsError> {
		self.client
			.get_json(&self.path(agent_id, "details"))
			.await
			.map_err(|e| self.unavailable(e))
	}
}

/// Factory function to create the HTTP rewards oracle from configuration.
///
/// Configuration parameters:
/// - `base_url`: middleware URL
/// - `request_timeout_secs`, `max_retries`: as for the balance source
pub fn create_oracle(chain: ChainId, config: &toml::Value) -> Box<dyn RewardsInterface> {
	Box::new(HttpRewards::new(chain, HttpClient::from_config(config)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn test_paths_include_chain_and_agent() {
		let oracle = HttpRewards::new(
			ChainId::MODE,
			HttpClient::new("http://localhost:8000", Duration::from_secs(1)),
		);
		assert_eq!(oracle.path("trader", "rewards"), "staking/34443/trader/rewards");
	}
}
