//! Balance source backed by the local middleware.
//!
//! `POST {base_url}/funding/balances` with the wallets to read. The middleware
//! answers with balances per chain and wallet, per-wallet failures and two
//! flags describing whether funding is currently moving.

use async_trait::async_trait;
use chrono::Utc;
use funding_types::{
	Address, BalanceSnapshot, ChainId, ConfigSchema, Field, FieldType, Schema, TokenBalances,
	ValidationError, WalletRef,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::client::HttpClient;
use crate::{BalanceError, BalanceInterface};

#[derive(Debug, Serialize)]
struct BalancesRequest<'a> {
	wallets: &'a [WalletRef],
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
	#[serde(default)]
	balances: BTreeMap<ChainId, BTreeMap<Address, TokenBalances>>,
	#[serde(default)]
	failures: BTreeMap<ChainId, BTreeMap<Address, String>>,
	#[serde(default)]
	funding_in_progress: bool,
	#[serde(default)]
	funding_cooldown: bool,
}

pub struct HttpBalanceSource {
	client: HttpClient,
}

impl HttpBalanceSource {
	pub fn new(client: HttpClient) -> Self {
		Self { client }
	}
}

pub struct HttpBalanceSourceSchema;

impl ConfigSchema for HttpBalanceSourceSchema {
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
impl BalanceInterface for HttpBalanceSource {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpBalanceSourceSchema)
	}

	async fn get_balances(&self, wallets: &[WalletRef]) -> Result<BalanceSnapshot, BalanceError> {
		let response: BalancesResponse = self
			.client
			.post_json("funding/balances", &BalancesRequest { wallets })
			.await?;

		Ok(BalanceSnapshot {
			balances: response.balances,
			failures: response.failures,
			funding_in_progress: response.funding_in_progress,
			funding_cooldown: response.funding_cooldown,
			fetched_at: Utc::now(),
		})
	}
}

/// Factory function to create the HTTP balance source from configuration.
///
/// Configuration parameters:
/// - `base_url`: middleware URL
/// - `request_timeout_secs`: per request timeout (default: 30)
/// - `max_retries`: retries for failed reads (default: 3)
pub fn create_balance_source(config: &toml::Value) -> Box<dyn BalanceInterface> {
	Box::new(HttpBalanceSource::new(HttpClient::from_config(config)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use funding_types::{Amount, NATIVE_TOKEN};

	#[test]
	fn test_response_decoding() {
		let json = r#"{
			"balances": {
				"100": {
					"0x1111111111111111111111111111111111111111": {
						"0x0000000000000000000000000000000000000000": "2500000000000000000"
					}
				}
			},
			"failures": {
				"100": { "0x2222222222222222222222222222222222222222": "rpc timeout" }
			},
			"funding_in_progress": true
		}"#;
		let response: BalancesResponse = serde_json::from_str(json).unwrap();
		let wallet = Address::repeat_byte(0x11);
		assert_eq!(
			response.balances[&ChainId::GNOSIS][&wallet][&NATIVE_TOKEN],
			Amount::from(2_500_000_000_000_000_000u128)
		);
		assert_eq!(response.failures[&ChainId::GNOSIS].len(), 1);
		assert!(response.funding_in_progress);
		assert!(!response.funding_cooldown);
	}

	#[test]
	fn test_request_encoding() {
		let wallets = [WalletRef {
			chain: ChainId::BASE,
			address: Address::repeat_byte(0x11),
		}];
		let body = serde_json::to_value(BalancesRequest { wallets: &wallets }).unwrap();
		assert_eq!(body["wallets"][0]["chain"], "8453");
	}

	#[test]
	fn test_schema_requires_url() {
		let config: toml::Value = toml::from_str("max_retries = 2").unwrap();
		assert!(HttpBalanceSourceSchema.validate(&config).is_err());
	}
}
