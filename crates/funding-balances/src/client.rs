//! JSON-over-HTTP client for the read-only middleware endpoints.
//!
//! Reads are retried with exponential backoff on transport errors and 5xx
//! responses. 4xx responses are returned immediately.

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::BalanceError;

#[derive(Debug, Clone)]
pub struct HttpClient {
	client: reqwest::Client,
	base_url: String,
	backoff: ExponentialBackoff,
	max_retries: u32,
}

impl HttpClient {
	pub fn new(base_url: &str, timeout: Duration) -> Self {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.unwrap_or_else(|e| {
				warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
				reqwest::Client::new()
			});
		let backoff = ExponentialBackoff {
			max_elapsed_time: Some(Duration::from_secs(30)),
			..Default::default()
		};

		Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
			backoff,
			max_retries: 3,
		}
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	/// Builds a client from the common `base_url`, `request_timeout_secs` and
	/// `max_retries` keys of an implementation table.
	pub fn from_config(config: &toml::Value) -> Self {
		let base_url = config
			.get("base_url")
			.and_then(|v| v.as_str())
			.unwrap_or("http://localhost:8000");
		let timeout = config
			.get("request_timeout_secs")
			.and_then(|v| v.as_integer())
			.unwrap_or(30)
			.max(1) as u64;
		let max_retries = config
			.get("max_retries")
			.and_then(|v| v.as_integer())
			.unwrap_or(3)
			.max(0) as u32;

		Self::new(base_url, Duration::from_secs(timeout)).with_max_retries(max_retries)
	}

	pub fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path.trim_start_matches('/'))
	}

	pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, BalanceError> {
		let url = self.url(path);
		self.with_retries(&url, || self.client.get(&url)).await
	}

	/// POST used for reads (the body only carries query parameters).
	pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, BalanceError>
	where
		B: Serialize + ?Sized,
		R: DeserializeOwned,
	{
		let url = self.url(path);
		self.with_retries(&url, || self.client.post(&url).json(body))
			.await
	}

	async fn with_retries<R, F>(&self, url: &str, request: F) -> Result<R, BalanceError>
	where
		R: DeserializeOwned,
		F: Fn() -> reqwest::RequestBuilder,
	{
		let mut backoff = self.backoff.clone();
		let mut attempts = 0;

		loop {
			let error = match send_once(request()).await {
				Ok(result) => return Ok(result),
				Err(e) if !e.is_retryable() => return Err(e),
				Err(e) => e,
			};

			attempts += 1;
			if attempts > self.max_retries {
				warn!(
					"Request to {} failed after {} attempts, giving up: {}",
					url, attempts, error
				);
				return Err(error);
			}

			match backoff.next_backoff() {
				Some(delay) => {
					warn!(
						"Request to {} failed, attempt {}/{}, retrying in {:?}: {}",
						url, attempts, self.max_retries, delay, error
					);
					tokio::time::sleep(delay).await;
				}
				None => {
					warn!(
						"Request to {} failed, backoff exhausted after {} attempts: {}",
						url, attempts, error
					);
					return Err(error);
				}
			}
		}
	}
}

async fn send_once<R: DeserializeOwned>(
	request: reqwest::RequestBuilder,
) -> Result<R, BalanceError> {
	let response = request
		.send()
		.await
		.map_err(|e| BalanceError::Transport(e.to_string()))?;

	let status = response.status();
	if !status.is_success() {
		let body = response.text().await.unwrap_or_default();
		return Err(BalanceError::Http {
			status: status.as_u16(),
			body,
		});
	}

	response
		.json()
		.await
		.map_err(|e| BalanceError::Decode(e.to_string()))
}
