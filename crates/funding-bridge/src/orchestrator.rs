//! Bridge orchestrator state machine.
//!
//! One orchestrator drives one funding attempt:
//!
//! ```text
//! Created -> QuoteRequested -> Quoted -> Executing -> PollingStatus -> Done
//!                 |                          |              |
//!                 v                          +---------> Failed
//!            QuoteFailed
//! ```
//!
//! Terminal states only move again on an explicit `submit` (QuoteFailed,
//! Failed) or `execute` (Failed, same quote id). At most one remote call is
//! in flight at a time; a concurrent call is rejected with
//! [`OrchestratorError::Busy`]. Cancellation stops observation only: the
//! provider keeps executing anything already submitted.

use chrono::Utc;
use funding_types::{
	all_execution_done, BridgeEvent, BridgeRequest, BridgeState, CancelSignal, ChainId, EventBus,
	FundingEvent, QuoteBundle, QuoteId, RequestStatusEntry, SessionId, StepDescriptor,
};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::retry::{BridgeFailure, FailureCause, FailureStage};
use crate::steps::{bridge_steps, StepsView};
use crate::BridgeInterface;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
	#[error("A bridge call is already in flight")]
	Busy,
	#[error("Cannot {action} from state {from}")]
	InvalidTransition {
		from: BridgeState,
		action: &'static str,
	},
	#[error("Unknown quote {0}")]
	UnknownQuote(QuoteId),
	#[error("Quote {0} has expired, request a new one")]
	QuoteExpired(QuoteId),
	#[error("Nothing to bridge")]
	NothingToBridge,
	#[error("Bridge observation cancelled")]
	Cancelled,
}

/// Point-in-time view of an orchestrator, for display and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorSnapshot {
	pub state: BridgeState,
	pub quote_id: Option<QuoteId>,
	pub eta: Option<u64>,
	pub statuses: Vec<RequestStatusEntry>,
	pub failure: Option<BridgeFailure>,
	pub steps: Vec<StepDescriptor>,
}

struct Inner {
	state: BridgeState,
	requests: Vec<BridgeRequest>,
	bundle: Option<QuoteBundle>,
	statuses: Vec<RequestStatusEntry>,
	failure: Option<BridgeFailure>,
}

/// Marks a remote call as in flight until dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
	fn acquire(flag: &'a AtomicBool) -> Result<Self, OrchestratorError> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.map_err(|_| OrchestratorError::Busy)?;
		Ok(Self(flag))
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

fn is_allowed(from: BridgeState, to: BridgeState) -> bool {
	use BridgeState::*;
	matches!(
		(from, to),
		(Created | Quoted | QuoteFailed | Failed, QuoteRequested)
			| (QuoteRequested, Quoted | QuoteFailed)
			| (Quoted | Failed, Executing)
			| (Executing, PollingStatus | Failed)
			| (PollingStatus, Done | Failed)
	)
}

pub struct BridgeOrchestrator {
	session_id: SessionId,
	provider: Arc<dyn BridgeInterface>,
	events: EventBus,
	cancel: CancelSignal,
	labels: Vec<String>,
	inner: RwLock<Inner>,
	in_flight: AtomicBool,
}

impl BridgeOrchestrator {
	pub fn new(
		session_id: SessionId,
		provider: Arc<dyn BridgeInterface>,
		events: EventBus,
		cancel: CancelSignal,
	) -> Self {
		Self {
			session_id,
			provider,
			events,
			cancel,
			labels: Vec::new(),
			inner: RwLock::new(Inner {
				state: BridgeState::Created,
				requests: Vec::new(),
				bundle: None,
				statuses: Vec::new(),
				failure: None,
			}),
			in_flight: AtomicBool::new(false),
		}
	}

	/// Per-request labels used in step descriptions, e.g. token symbols.
	pub fn with_labels(mut self, labels: Vec<String>) -> Self {
		self.labels = labels;
		self
	}

	/// Requests a quote for `requests`.
	///
	/// Allowed from Created, Quoted (re-quote), QuoteFailed and Failed.
	/// Returns the resulting state, Quoted or QuoteFailed.
	pub async fn submit(
		&self,
		requests: Vec<BridgeRequest>,
		force_update: bool,
	) -> Result<BridgeState, OrchestratorError> {
		if requests.is_empty() {
			return Err(OrchestratorError::NothingToBridge);
		}
		let _in_flight = InFlight::acquire(&self.in_flight)?;
		self.ensure_active()?;

		{
			let mut inner = self.inner.write().await;
			self.check(&inner, BridgeState::QuoteRequested, "submit")?;
			inner.requests = requests.clone();
			inner.bundle = None;
			inner.statuses.clear();
			inner.failure = None;
			self.transition(&mut inner, BridgeState::QuoteRequested);
		}

		let result = self
			.observe(self.provider.quote(&requests, force_update))
			.await?;

		let mut inner = self.inner.write().await;
		match result {
			Ok(bundle) if bundle.is_quoted() => {
				debug!(
					session_id = %self.session_id,
					quote_id = %bundle.id,
					eta = ?bundle.eta(),
					"Bridge quote accepted"
				);
				inner.statuses = bundle.statuses.clone();
				inner.bundle = Some(bundle);
				self.transition(&mut inner, BridgeState::Quoted);
			}
			Ok(bundle) => {
				let failure = BridgeFailure::from_statuses(FailureStage::Quote, &bundle.statuses)
					.unwrap_or(BridgeFailure {
						stage: FailureStage::Quote,
						cause: FailureCause::Unknown,
						message: "provider did not price every request".to_string(),
						request_index: None,
						explorer_link: None,
					});
				warn!(
					session_id = %self.session_id,
					quote_id = %bundle.id,
					cause = %failure.cause,
					"Bridge quote failed"
				);
				inner.statuses = bundle.statuses;
				inner.failure = Some(failure);
				self.transition(&mut inner, BridgeState::QuoteFailed);
			}
			Err(e) => {
				warn!(session_id = %self.session_id, error = %e, "Bridge quote request failed");
				inner.failure = Some(BridgeFailure::from_error(FailureStage::Quote, &e));
				self.transition(&mut inner, BridgeState::QuoteFailed);
			}
		}
		Ok(inner.state)
	}

	/// Executes the quoted bundle `quote_id`.
	///
	/// Allowed from Quoted, and from Failed to retry the same quote. An
	/// expired quote is refused without a state change; submit again instead.
	pub async fn execute(&self, quote_id: &QuoteId) -> Result<BridgeState, OrchestratorError> {
		let _in_flight = InFlight::acquire(&self.in_flight)?;
		self.ensure_active()?;

		{
			let mut inner = self.inner.write().await;
			let bundle = inner
				.bundle
				.as_ref()
				.filter(|bundle| bundle.id == *quote_id)
				.ok_or_else(|| OrchestratorError::UnknownQuote(quote_id.clone()))?;
			let expired = bundle.is_expired(Utc::now());
			self.check(&inner, BridgeState::Executing, "execute")?;
			if expired {
				return Err(OrchestratorError::QuoteExpired(quote_id.clone()));
			}
			inner.failure = None;
			self.transition(&mut inner, BridgeState::Executing);
		}

		let result = self.observe(self.provider.execute(quote_id)).await?;

		let mut inner = self.inner.write().await;
		match result {
			Ok(entries) => {
				let failure = BridgeFailure::from_statuses(FailureStage::Execute, &entries);
				let done = all_execution_done(&entries, inner.requests.len());
				inner.statuses = entries;
				match failure {
					Some(failure) => {
						warn!(
							session_id = %self.session_id,
							quote_id = %quote_id,
							cause = %failure.cause,
							"Bridge execution failed"
						);
						inner.failure = Some(failure);
						self.transition(&mut inner, BridgeState::Failed);
					}
					None => {
						self.transition(&mut inner, BridgeState::PollingStatus);
						// Already settled, no need to wait for a status poll.
						if done {
							self.transition(&mut inner, BridgeState::Done);
						}
					}
				}
			}
			Err(e) => {
				warn!(
					session_id = %self.session_id,
					quote_id = %quote_id,
					error = %e,
					"Bridge execute call failed"
				);
				inner.failure = Some(BridgeFailure::from_error(FailureStage::Execute, &e));
				self.transition(&mut inner, BridgeState::Failed);
			}
		}
		Ok(inner.state)
	}

	/// Reads the bundle status once.
	///
	/// In a terminal state this returns the state without calling the
	/// provider. A failed status read is logged and leaves the orchestrator
	/// in PollingStatus so the next tick tries again.
	pub async fn poll_status(&self) -> Result<BridgeState, OrchestratorError> {
		let _in_flight = InFlight::acquire(&self.in_flight)?;
		self.ensure_active()?;

		let quote_id = {
			let inner = self.inner.read().await;
			if inner.state.is_terminal() {
				return Ok(inner.state);
			}
			if inner.state != BridgeState::PollingStatus {
				return Err(OrchestratorError::InvalidTransition {
					from: inner.state,
					action: "poll status",
				});
			}
			match &inner.bundle {
				Some(bundle) => bundle.id.clone(),
				None => {
					return Err(OrchestratorError::InvalidTransition {
						from: inner.state,
						action: "poll status",
					})
				}
			}
		};

		let result = self.observe(self.provider.status(&quote_id)).await?;

		let mut inner = self.inner.write().await;
		match result {
			Ok(entries) => {
				let failure = BridgeFailure::from_statuses(FailureStage::Status, &entries);
				let done = all_execution_done(&entries, inner.requests.len());
				inner.statuses = entries;
				if let Some(failure) = failure {
					warn!(
						session_id = %self.session_id,
						quote_id = %quote_id,
						cause = %failure.cause,
						"Bridge request failed on chain"
					);
					inner.failure = Some(failure);
					self.transition(&mut inner, BridgeState::Failed);
				} else if done {
					self.transition(&mut inner, BridgeState::Done);
				}
			}
			Err(e) => {
				warn!(
					session_id = %self.session_id,
					quote_id = %quote_id,
					error = %e,
					"Bridge status read failed, polling again"
				);
			}
		}
		Ok(inner.state)
	}

	/// Polls every `interval` until the bundle settles.
	pub async fn wait_until_terminal(
		&self,
		interval: Duration,
	) -> Result<BridgeState, OrchestratorError> {
		loop {
			let state = self.poll_status().await?;
			if state.is_terminal() {
				return Ok(state);
			}
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
				_ = tokio::time::sleep(interval) => {}
			}
		}
	}

	pub async fn state(&self) -> BridgeState {
		self.inner.read().await.state
	}

	pub async fn quote_id(&self) -> Option<QuoteId> {
		self.inner
			.read()
			.await
			.bundle
			.as_ref()
			.map(|bundle| bundle.id.clone())
	}

	/// Requests of the latest submit.
	pub async fn requests(&self) -> Vec<BridgeRequest> {
		self.inner.read().await.requests.clone()
	}

	pub async fn bundle(&self) -> Option<QuoteBundle> {
		self.inner.read().await.bundle.clone()
	}

	pub async fn failure(&self) -> Option<BridgeFailure> {
		self.inner.read().await.failure.clone()
	}

	pub async fn snapshot(&self) -> OrchestratorSnapshot {
		let inner = self.inner.read().await;
		OrchestratorSnapshot {
			state: inner.state,
			quote_id: inner.bundle.as_ref().map(|bundle| bundle.id.clone()),
			eta: inner.bundle.as_ref().and_then(|bundle| bundle.eta()),
			statuses: inner.statuses.clone(),
			failure: inner.failure.clone(),
			steps: self.steps(&inner),
		}
	}

	fn ensure_active(&self) -> Result<(), OrchestratorError> {
		if self.cancel.is_cancelled() {
			return Err(OrchestratorError::Cancelled);
		}
		Ok(())
	}

	fn check(
		&self,
		inner: &Inner,
		to: BridgeState,
		action: &'static str,
	) -> Result<(), OrchestratorError> {
		if is_allowed(inner.state, to) {
			Ok(())
		} else {
			Err(OrchestratorError::InvalidTransition {
				from: inner.state,
				action,
			})
		}
	}

	/// Awaits a provider call unless the session is cancelled first.
	async fn observe<T>(&self, call: impl Future<Output = T>) -> Result<T, OrchestratorError> {
		tokio::select! {
			biased;
			_ = self.cancel.cancelled() => {
				debug!(session_id = %self.session_id, "Stopped observing bridge call");
				Err(OrchestratorError::Cancelled)
			}
			result = call => Ok(result),
		}
	}

	fn steps(&self, inner: &Inner) -> Vec<StepDescriptor> {
		let to_chain: Option<ChainId> = inner.requests.first().map(|request| request.to.chain);
		bridge_steps(&StepsView {
			state: inner.state,
			to_chain,
			statuses: &inner.statuses,
			labels: &self.labels,
			failure: inner.failure.as_ref(),
		})
	}

	fn transition(&self, inner: &mut Inner, to: BridgeState) {
		let from = inner.state;
		inner.state = to;
		let quote_id = inner.bundle.as_ref().map(|bundle| bundle.id.clone());
		info!(
			session_id = %self.session_id,
			quote_id = ?quote_id.as_ref().map(|id| id.to_string()),
			from = %from,
			to = %to,
			"Bridge state changed"
		);
		self.events
			.publish(FundingEvent::Bridge(BridgeEvent::Transition {
				session_id: self.session_id,
				quote_id,
				from,
				to,
				steps: self.steps(inner),
			}))
			.ok();
	}
}
