//! Cross-chain bridge requests, quotes and their per-request statuses.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Amount, ChainId};

/// Where the funds of a bridge request come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeSource {
	pub chain: ChainId,
	pub address: Address,
	pub token: Address,
}

/// Where the funds of a bridge request go, and how much must arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeDestination {
	pub chain: ChainId,
	pub address: Address,
	pub token: Address,
	pub amount: Amount,
}

/// A single cross-chain transfer. Never emitted with a zero amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeRequest {
	pub from: BridgeSource,
	pub to: BridgeDestination,
}

impl BridgeRequest {
	pub fn route_key(&self) -> RouteKey {
		RouteKey {
			from_chain: self.from.chain,
			to_chain: self.to.chain,
			from_address: self.from.address,
			to_address: self.to.address,
			from_token: self.from.token,
			to_token: self.to.token,
		}
	}
}

/// Identity of a route. Requests sharing a key are merged by summing amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
	pub from_chain: ChainId,
	pub to_chain: ChainId,
	pub from_address: Address,
	pub to_address: Address,
	pub from_token: Address,
	pub to_token: Address,
}

/// Which address receives a bridged amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientPolicy {
	/// Everything lands in the master externally-owned wallet, which then
	/// distributes to safes through on-chain transfers.
	#[default]
	External,
	/// Each amount goes straight to the wallet that needs it. The placeholder
	/// still resolves to the externally-owned wallet.
	Holder,
}

/// Provider-side status of one request in a quote bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequestStatus {
	Created,
	QuoteDone,
	QuoteFailed,
	ExecutionPending,
	ExecutionDone,
	ExecutionFailed,
}

impl BridgeRequestStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			Self::QuoteFailed | Self::ExecutionDone | Self::ExecutionFailed
		)
	}

	pub fn is_failed(&self) -> bool {
		matches!(self, Self::QuoteFailed | Self::ExecutionFailed)
	}
}

/// Structured reason a provider attaches to a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
	InsufficientFunds,
	QuoteExpired,
	RouteUnavailable,
	Slippage,
	Reverted,
	#[serde(other)]
	Other,
}

/// Status entry for one request, as returned by quote, execute and status calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatusEntry {
	pub status: BridgeRequestStatus,
	#[serde(default)]
	pub explorer_link: Option<String>,
	/// Estimated seconds to completion.
	#[serde(default)]
	pub eta: Option<u64>,
	#[serde(default)]
	pub message: Option<String>,
	#[serde(default)]
	pub error: Option<ProviderErrorCode>,
}

impl RequestStatusEntry {
	pub fn new(status: BridgeRequestStatus) -> Self {
		Self {
			status,
			explorer_link: None,
			eta: None,
			message: None,
			error: None,
		}
	}
}

/// All `expected` requests report ExecutionDone. A list shorter than the
/// bundle, or an empty one, is never "done".
pub fn all_execution_done(entries: &[RequestStatusEntry], expected: usize) -> bool {
	entries.len() >= expected.max(1)
		&& entries
			.iter()
			.all(|entry| entry.status == BridgeRequestStatus::ExecutionDone)
}

/// Any entry ended in ExecutionFailed.
pub fn any_execution_failed(entries: &[RequestStatusEntry]) -> bool {
	entries
		.iter()
		.any(|entry| entry.status == BridgeRequestStatus::ExecutionFailed)
}

/// Provider-assigned identifier of a quote bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub String);

impl fmt::Display for QuoteId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for QuoteId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// A priced set of requests, created once per funding attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteBundle {
	pub id: QuoteId,
	pub requests: Vec<BridgeRequest>,
	pub statuses: Vec<RequestStatusEntry>,
	pub expires_at: Option<DateTime<Utc>>,
}

impl QuoteBundle {
	pub fn all_done(&self) -> bool {
		all_execution_done(&self.statuses, self.requests.len())
	}

	/// Any request is in a failed state (quote or execution).
	pub fn is_failed(&self) -> bool {
		self.statuses.iter().any(|entry| entry.status.is_failed())
	}

	/// Every request was priced.
	pub fn is_quoted(&self) -> bool {
		self.statuses.len() >= self.requests.len().max(1)
			&& self
				.statuses
				.iter()
				.all(|entry| entry.status == BridgeRequestStatus::QuoteDone)
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.is_some_and(|expires_at| now >= expires_at)
	}

	/// Longest ETA among priced requests.
	pub fn eta(&self) -> Option<u64> {
		self.statuses
			.iter()
			.filter(|entry| entry.status == BridgeRequestStatus::QuoteDone)
			.filter_map(|entry| entry.eta)
			.max()
	}
}

/// Orchestrator phase for one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
	Created,
	QuoteRequested,
	Quoted,
	QuoteFailed,
	Executing,
	PollingStatus,
	Done,
	Failed,
}

impl BridgeState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::QuoteFailed | Self::Done | Self::Failed)
	}
}

impl fmt::Display for BridgeState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Created => "Created",
			Self::QuoteRequested => "QuoteRequested",
			Self::Quoted => "Quoted",
			Self::QuoteFailed => "QuoteFailed",
			Self::Executing => "Executing",
			Self::PollingStatus => "PollingStatus",
			Self::Done => "Done",
			Self::Failed => "Failed",
		};
		f.write_str(name)
	}
}

/// How the caller should react to a failed bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryOutcome {
	/// The source wallet lacked funds; requirements must be recomputed.
	NeedRefill,
	/// Safe to re-invoke execute or submit unchanged.
	Transient,
}

/// One token leg of a planned transfer, for display and session persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
	pub from_symbol: String,
	pub to_symbol: String,
	pub amount: Amount,
	pub decimals: u8,
	/// Amount in whole units, e.g. "1.5".
	pub display_amount: String,
}

/// Summary of what a funding attempt moves between chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
	pub from_chain: ChainId,
	pub to_chain: ChainId,
	pub transfers: Vec<TokenTransfer>,
	pub eta: Option<u64>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(status: BridgeRequestStatus, eta: Option<u64>) -> RequestStatusEntry {
		RequestStatusEntry {
			eta,
			..RequestStatusEntry::new(status)
		}
	}

	fn request() -> BridgeRequest {
		BridgeRequest {
			from: BridgeSource {
				chain: ChainId::ETHEREUM,
				address: Address::repeat_byte(0xe0),
				token: Address::ZERO,
			},
			to: BridgeDestination {
				chain: ChainId::GNOSIS,
				address: Address::repeat_byte(0xe0),
				token: Address::ZERO,
				amount: Amount::from(1u64),
			},
		}
	}

	#[test]
	fn test_status_wire_format() {
		let json = r#"{"status":"EXECUTION_DONE","explorer_link":"https://scan/tx/1"}"#;
		let parsed: RequestStatusEntry = serde_json::from_str(json).unwrap();
		assert_eq!(parsed.status, BridgeRequestStatus::ExecutionDone);
		assert_eq!(parsed.explorer_link.as_deref(), Some("https://scan/tx/1"));

		let code: ProviderErrorCode = serde_json::from_str("\"something_new\"").unwrap();
		assert_eq!(code, ProviderErrorCode::Other);
	}

	#[test]
	fn test_bundle_flags() {
		let bundle = QuoteBundle {
			id: QuoteId::from("q-1"),
			requests: Vec::new(),
			statuses: vec![
				entry(BridgeRequestStatus::QuoteDone, Some(300)),
				entry(BridgeRequestStatus::QuoteDone, Some(900)),
			],
			expires_at: None,
		};
		assert!(bundle.is_quoted());
		assert!(!bundle.all_done());
		assert!(!bundle.is_failed());
		assert_eq!(bundle.eta(), Some(900));
	}

	#[test]
	fn test_empty_status_list_is_never_done() {
		assert!(!all_execution_done(&[], 0));
		assert!(!any_execution_failed(&[]));
	}

	#[test]
	fn test_short_status_list_is_not_done() {
		let done = [entry(BridgeRequestStatus::ExecutionDone, None)];
		assert!(all_execution_done(&done, 1));
		assert!(!all_execution_done(&done, 2));

		let bundle = QuoteBundle {
			id: QuoteId::from("q-2"),
			requests: vec![request(), request()],
			statuses: vec![entry(BridgeRequestStatus::QuoteDone, None)],
			expires_at: None,
		};
		assert!(!bundle.is_quoted());
	}
}
