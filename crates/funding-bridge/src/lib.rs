//! Cross-chain bridging through a quote provider.
//!
//! A provider prices a set of bridge requests as one quote bundle, executes
//! it by id and reports per-request progress. The [`BridgeOrchestrator`]
//! drives one bundle through that lifecycle for a single funding session.

use async_trait::async_trait;
use funding_types::{
	BridgeRequest, ConfigSchema, ProviderErrorCode, QuoteBundle, QuoteId, RequestStatusEntry,
};
use thiserror::Error;

pub mod orchestrator;
pub mod retry;
pub mod steps;

pub mod implementations {
	pub mod http;
}

pub use orchestrator::{BridgeOrchestrator, OrchestratorError, OrchestratorSnapshot};
pub use retry::{classify, BridgeFailure, FailureCause, FailureStage};
pub use steps::{bridge_steps, StepsView};

/// Errors returned by quote providers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
	#[error("Transport error: {0}")]
	Transport(String),
	#[error("HTTP {status}: {body}")]
	Http { status: u16, body: String },
	#[error("Failed to decode provider response: {0}")]
	Decode(String),
	/// The provider understood the call and refused it.
	#[error("Provider rejected the request: {message}")]
	Rejected {
		message: String,
		code: Option<ProviderErrorCode>,
	},
}

/// A bridging provider.
///
/// Calls are never retried by implementations. The provider deduplicates
/// execution by quote id, so re-invoking `execute` after a transient failure
/// is safe, but that decision belongs to the user.
#[async_trait]
pub trait BridgeInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Prices `requests`. `force_update` asks for a fresh quote instead of a
	/// cached one.
	async fn quote(
		&self,
		requests: &[BridgeRequest],
		force_update: bool,
	) -> Result<QuoteBundle, BridgeError>;

	/// Starts executing a quoted bundle.
	async fn execute(&self, quote_id: &QuoteId) -> Result<Vec<RequestStatusEntry>, BridgeError>;

	/// Reads the per-request progress of an executing bundle.
	async fn status(&self, quote_id: &QuoteId) -> Result<Vec<RequestStatusEntry>, BridgeError>;
}
