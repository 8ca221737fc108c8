//! Failure causes and their retry classification.
//!
//! The orchestrator records why an attempt failed; the flow that owns the
//! orchestrator decides what to do about it through [`classify`].

use funding_types::{ProviderErrorCode, RequestStatusEntry, RetryOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BridgeError;

/// Why a quote or execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
	/// The source wallet cannot cover the planned transfer.
	InsufficientFunds,
	/// The quote's expiration passed before execution.
	QuoteExpired,
	/// The provider has no route for at least one request.
	RouteUnavailable,
	/// Price moved beyond tolerance.
	Slippage,
	/// The on-chain transaction reverted.
	Reverted,
	/// The provider could not be reached or answered with an error.
	ProviderUnavailable,
	/// Failed without a recognizable reason.
	Unknown,
}

impl From<ProviderErrorCode> for FailureCause {
	fn from(code: ProviderErrorCode) -> Self {
		match code {
			ProviderErrorCode::InsufficientFunds => Self::InsufficientFunds,
			ProviderErrorCode::QuoteExpired => Self::QuoteExpired,
			ProviderErrorCode::RouteUnavailable => Self::RouteUnavailable,
			ProviderErrorCode::Slippage => Self::Slippage,
			ProviderErrorCode::Reverted => Self::Reverted,
			ProviderErrorCode::Other => Self::Unknown,
		}
	}
}

impl fmt::Display for FailureCause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			Self::InsufficientFunds => "insufficient funds in the source wallet",
			Self::QuoteExpired => "quote expired",
			Self::RouteUnavailable => "no bridge route available",
			Self::Slippage => "price moved beyond tolerance",
			Self::Reverted => "transaction reverted",
			Self::ProviderUnavailable => "bridge provider unavailable",
			Self::Unknown => "unknown failure",
		};
		f.write_str(text)
	}
}

/// Which call produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
	Quote,
	Execute,
	Status,
}

/// A recorded failure, kept for display and retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeFailure {
	pub stage: FailureStage,
	pub cause: FailureCause,
	pub message: String,
	/// Index of the failed request in the bundle, when one is identifiable.
	pub request_index: Option<usize>,
	pub explorer_link: Option<String>,
}

impl BridgeFailure {
	/// Failure of the remote call itself.
	pub fn from_error(stage: FailureStage, error: &BridgeError) -> Self {
		let cause = match error {
			BridgeError::Rejected { code: Some(code), .. } => FailureCause::from(*code),
			BridgeError::Rejected { code: None, .. } => FailureCause::Unknown,
			BridgeError::Transport(_) | BridgeError::Http { .. } | BridgeError::Decode(_) => {
				FailureCause::ProviderUnavailable
			}
		};
		Self {
			stage,
			cause,
			message: error.to_string(),
			request_index: None,
			explorer_link: None,
		}
	}

	/// Failure reported in the per-request statuses. Picks the first failed
	/// entry; returns `None` when no entry failed.
	pub fn from_statuses(stage: FailureStage, entries: &[RequestStatusEntry]) -> Option<Self> {
		let (index, entry) = entries
			.iter()
			.enumerate()
			.find(|(_, entry)| entry.status.is_failed())?;
		let cause = entry.error.map(FailureCause::from).unwrap_or(FailureCause::Unknown);
		Some(Self {
			stage,
			cause,
			message: entry
				.message
				.clone()
				.unwrap_or_else(|| cause.to_string()),
			request_index: Some(index),
			explorer_link: entry.explorer_link.clone(),
		})
	}
}

/// Maps a failure to what the funding flow should do next.
///
/// Only a lack of source funds sends the flow back to requirement
/// computation. Everything else can be retried with the same plan, which
/// for an expired quote means a fresh submit.
pub fn classify(cause: FailureCause) -> RetryOutcome {
	match cause {
		FailureCause::InsufficientFunds => RetryOutcome::NeedRefill,
		FailureCause::QuoteExpired
		| FailureCause::RouteUnavailable
		| FailureCause::Slippage
		| FailureCause::Reverted
		| FailureCause::ProviderUnavailable
		| FailureCause::Unknown => RetryOutcome::Transient,
	}
}
