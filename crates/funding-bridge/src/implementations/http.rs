//! Quote provider reached through the local middleware.
//!
//! - `POST {base_url}/bridge/quote` with `{bridge_requests, force_update}`
//! - `POST {base_url}/bridge/execute` with `{id}`
//! - `GET  {base_url}/bridge/status/{id}`
//!
//! Every response carries `bridge_request_status`, one entry per request in
//! the order they were submitted. Requests are sent once; there is no retry
//! layer here so an execution is never submitted twice behind the user's back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_types::{
	BridgeRequest, ConfigSchema, Field, FieldType, ProviderErrorCode, QuoteBundle, QuoteId,
	RequestStatusEntry, Schema, ValidationError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{BridgeError, BridgeInterface};

#[derive(Debug, Serialize)]
struct QuoteRequest<'a> {
	bridge_requests: &'a [BridgeRequest],
	force_update: bool,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
	id: &'a QuoteId,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
	id: QuoteId,
	#[serde(default)]
	bridge_request_status: Vec<RequestStatusEntry>,
	/// Unix seconds.
	#[serde(default)]
	expiration_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
	#[serde(default)]
	bridge_request_status: Vec<RequestStatusEntry>,
}

/// Error body the provider sends with a 4xx refusal.
#[derive(Debug, Deserialize)]
struct RejectionBody {
	#[serde(alias = "error_message")]
	message: String,
	#[serde(default)]
	error: Option<ProviderErrorCode>,
}

pub struct HttpBridgeProvider {
	client: reqwest::Client,
	base_url: String,
}

impl HttpBridgeProvider {
	pub fn new(base_url: &str, timeout: Duration) -> Self {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.unwrap_or_else(|e| {
				warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
				reqwest::Client::new()
			});
		Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
		}
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path)
	}

	async fn send<R: DeserializeOwned>(
		&self,
		request: reqwest::RequestBuilder,
	) -> Result<R, BridgeError> {
		let response = request
			.send()
			.await
			.map_err(|e| BridgeError::Transport(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(rejection(status.as_u16(), body));
		}

		response
			.json()
			.await
			.map_err(|e| BridgeError::Decode(e.to_string()))
	}
}

/// 4xx responses with a structured body are refusals; anything else is an
/// HTTP failure.
fn rejection(status: u16, body: String) -> BridgeError {
	if (400..500).contains(&status) {
		if let Ok(parsed) = serde_json::from_str::<RejectionBody>(&body) {
			return BridgeError::Rejected {
				message: parsed.message,
				code: parsed.error,
			};
		}
	}
	BridgeError::Http { status, body }
}

fn expiry(timestamp: Option<i64>) -> Option<DateTime<Utc>> {
	timestamp.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

pub struct HttpBridgeProviderSchema;

impl ConfigSchema for HttpBridgeProviderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::Url)],
			vec![Field::new(
				"request_timeout_secs",
				FieldType::Integer {
					min: Some(1),
					max: Some(600),
				},
			)],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl BridgeInterface for HttpBridgeProvider {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpBridgeProviderSchema)
	}

	async fn quote(
		&self,
		requests: &[BridgeRequest],
		force_update: bool,
	) -> Result<QuoteBundle, BridgeError> {
		let body = QuoteRequest {
			bridge_requests: requests,
			force_update,
		};
		let response: QuoteResponse = self
			.send(self.client.post(self.url("bridge/quote")).json(&body))
			.await?;
		debug!(
			quote_id = %response.id,
			requests = requests.len(),
			"Received bridge quote"
		);

		Ok(QuoteBundle {
			id: response.id,
			requests: requests.to_vec(),
			statuses: response.bridge_request_status,
			expires_at: expiry(response.expiration_timestamp),
		})
	}

	async fn execute(&self, quote_id: &QuoteId) -> Result<Vec<RequestStatusEntry>, BridgeError> {
		let response: StatusResponse = self
			.send(
				self.client
					.post(self.url("bridge/execute"))
					.json(&ExecuteRequest { id: quote_id }),
			)
			.await?;
		Ok(response.bridge_request_status)
	}

	async fn status(&self, quote_id: &QuoteId) -> Result<Vec<RequestStatusEntry>, BridgeError> {
		let path = format!("bridge/status/{}", quote_id);
		let response: StatusResponse = self.send(self.client.get(self.url(&path))).await?;
		Ok(response.bridge_request_status)
	}
}

/// Factory function to create the HTTP quote provider from configuration.
///
/// Configuration parameters:
/// - `base_url`: middleware URL
/// - `request_timeout_secs`: per request timeout (default: 30)
pub fn create_provider(config: &toml::Value) -> Box<dyn BridgeInterface> {
	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.unwrap_or("http://localhost:8000");
	let timeout = config
		.get("request_timeout_secs")
		.and_then(|v| v.as_integer())
		.unwrap_or(30)
		.max(1) as u64;

	Box::new(HttpBridgeProvider::new(base_url, Duration::from_secs(timeout)))
}
