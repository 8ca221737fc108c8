//! Funding sessions.
//!
//! A session is owned by whoever opened it (one onboarding or top-up screen)
//! and handed to the engine by reference. Sessions never share state, so
//! several agents can be funded side by side.

use chrono::{DateTime, Utc};
use funding_bridge::{BridgeOrchestrator, OrchestratorSnapshot};
use funding_scheduler::Visibility;
use funding_types::{
	CancelSignal, Credit, FlowState, QuoteId, RetryOutcome, SessionId, TransferSummary,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, Notify, RwLock};

use crate::engine::Assessment;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
	#[error("Flow cannot move from {from} to {to}")]
	InvalidFlow { from: FlowState, to: FlowState },
	#[error("A funding attempt is already running")]
	AttemptRunning,
}

/// Client-reported conditions that drive the poll cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence {
	/// The agent's service is running.
	pub service_active: bool,
	pub visibility: Visibility,
}

/// Persisted part of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
	pub id: SessionId,
	pub agent_id: String,
	pub flow_state: FlowState,
	pub quote_id: Option<QuoteId>,
	pub transfer: Option<TransferSummary>,
	/// Classification of the latest failed attempt.
	pub last_outcome: Option<RetryOutcome>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
	pub fn new(id: SessionId, agent_id: &str) -> Self {
		let now = Utc::now();
		Self {
			id,
			agent_id: agent_id.to_string(),
			flow_state: FlowState::Depositing,
			quote_id: None,
			transfer: None,
			last_outcome: None,
			created_at: now,
			updated_at: now,
		}
	}

	/// Moves the flow to `to` and returns the previous state.
	///
	/// Going back to Depositing discards the quote id and transfer summary.
	/// Moving to the current state is a no-op.
	pub fn transition(&mut self, to: FlowState) -> Result<FlowState, SessionError> {
		use FlowState::*;
		let from = self.flow_state;
		if from == to {
			return Ok(from);
		}
		if !matches!(
			(from, to),
			(Depositing, InProgress) | (InProgress, Completed) | (InProgress | Completed, Depositing)
		) {
			return Err(SessionError::InvalidFlow { from, to });
		}
		if to == Depositing {
			self.quote_id = None;
			self.transfer = None;
		}
		self.flow_state = to;
		self.updated_at = Utc::now();
		Ok(from)
	}

	/// Records the bundle being executed and enters InProgress.
	pub fn begin(
		&mut self,
		quote_id: QuoteId,
		transfer: Option<TransferSummary>,
	) -> Result<FlowState, SessionError> {
		let from = self.transition(FlowState::InProgress)?;
		self.quote_id = Some(quote_id);
		self.transfer = transfer;
		self.last_outcome = None;
		Ok(from)
	}
}

/// Everything the display layer shows for a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
	#[serde(flatten)]
	pub record: SessionRecord,
	pub presence: Presence,
	pub assessment: Option<Assessment>,
	pub bridge: Option<OrchestratorSnapshot>,
}

pub struct FundingSession {
	id: SessionId,
	agent_id: String,
	cancel: CancelSignal,
	record: RwLock<SessionRecord>,
	orchestrator: RwLock<Option<Arc<BridgeOrchestrator>>>,
	/// Amounts being bridged right now, credited until the bundle settles.
	in_flight: RwLock<Vec<Credit>>,
	assessment: RwLock<Option<Assessment>>,
	presence: RwLock<Presence>,
	presence_changed: Notify,
	attempt: Mutex<()>,
}

impl FundingSession {
	pub fn new(record: SessionRecord) -> Self {
		Self {
			id: record.id,
			agent_id: record.agent_id.clone(),
			cancel: CancelSignal::new(),
			record: RwLock::new(record),
			orchestrator: RwLock::new(None),
			in_flight: RwLock::new(Vec::new()),
			assessment: RwLock::new(None),
			presence: RwLock::new(Presence::default()),
			presence_changed: Notify::new(),
			attempt: Mutex::new(()),
		}
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	pub fn agent_id(&self) -> &str {
		&self.agent_id
	}

	pub fn cancel_signal(&self) -> &CancelSignal {
		&self.cancel
	}

	/// Stops every poll and remote observation of this session.
	pub fn close(&self) {
		self.cancel.cancel();
		self.presence_changed.notify_waiters();
	}

	pub async fn record(&self) -> SessionRecord {
		self.record.read().await.clone()
	}

	pub async fn flow_state(&self) -> FlowState {
		self.record.read().await.flow_state
	}

	/// Applies `update` to the record and returns the updated copy.
	pub async fn update_record<T>(
		&self,
		update: impl FnOnce(&mut SessionRecord) -> Result<T, SessionError>,
	) -> Result<(T, SessionRecord), SessionError> {
		let mut record = self.record.write().await;
		let result = update(&mut record)?;
		Ok((result, record.clone()))
	}

	pub async fn orchestrator(&self) -> Option<Arc<BridgeOrchestrator>> {
		self.orchestrator.read().await.clone()
	}

	pub async fn set_orchestrator(&self, orchestrator: Option<Arc<BridgeOrchestrator>>) {
		*self.orchestrator.write().await = orchestrator;
	}

	pub async fn in_flight(&self) -> Vec<Credit> {
		self.in_flight.read().await.clone()
	}

	pub async fn set_in_flight(&self, credits: Vec<Credit>) {
		*self.in_flight.write().await = credits;
	}

	pub async fn assessment(&self) -> Option<Assessment> {
		self.assessment.read().await.clone()
	}

	pub async fn set_assessment(&self, assessment: Option<Assessment>) {
		*self.assessment.write().await = assessment;
	}

	pub async fn presence(&self) -> Presence {
		*self.presence.read().await
	}

	/// Updates the presence and wakes the poll loop so it can re-plan its wait.
	pub async fn set_presence(&self, presence: Presence) {
		*self.presence.write().await = presence;
		self.presence_changed.notify_waiters();
	}

	/// Resolves on the next presence update or on close.
	pub async fn presence_changed(&self) {
		self.presence_changed.notified().await;
	}

	/// Claims the session for one funding attempt at a time.
	pub fn try_begin_attempt(&self) -> Result<MutexGuard<'_, ()>, SessionError> {
		self.attempt
			.try_lock()
			.map_err(|_| SessionError::AttemptRunning)
	}

	pub async fn view(&self) -> SessionView {
		let bridge = match self.orchestrator().await {
			Some(orchestrator) => Some(orchestrator.snapshot().await),
			None => None,
		};
		SessionView {
			record: self.record().await,
			presence: self.presence().await,
			assessment: self.assessment().await,
			bridge,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use funding_types::ChainId;

	#[test]
	fn test_flow_transitions() {
		let mut record = SessionRecord::new(SessionId::new(), "trader");
		assert_eq!(record.flow_state, FlowState::Depositing);

		assert_eq!(
			record.transition(FlowState::Completed),
			Err(SessionError::InvalidFlow {
				from: FlowState::Depositing,
				to: FlowState::Completed,
			})
		);

		let summary = TransferSummary {
			from_chain: ChainId::ETHEREUM,
			to_chain: ChainId::GNOSIS,
			transfers: Vec::new(),
			eta: Some(60),
		};
		assert_eq!(
			record.begin(QuoteId::from("q1"), Some(summary)),
			Ok(FlowState::Depositing)
		);
		assert_eq!(record.flow_state, FlowState::InProgress);
		assert_eq!(record.quote_id, Some(QuoteId::from("q1")));

		assert_eq!(record.transition(FlowState::Completed), Ok(FlowState::InProgress));
		assert_eq!(record.transition(FlowState::Completed), Ok(FlowState::Completed));
		assert!(record.transition(FlowState::InProgress).is_err());
	}

	#[test]
	fn test_back_to_depositing_discards_quote() {
		let mut record = SessionRecord::new(SessionId::new(), "trader");
		record.begin(QuoteId::from("q1"), None).unwrap();

		assert_eq!(record.transition(FlowState::Depositing), Ok(FlowState::InProgress));
		assert!(record.quote_id.is_none());
		assert!(record.transfer.is_none());
	}

	#[tokio::test]
	async fn test_one_attempt_at_a_time() {
		let session = FundingSession::new(SessionRecord::new(SessionId::new(), "trader"));
		let guard = session.try_begin_attempt().unwrap();
		assert_eq!(
			session.try_begin_attempt().err(),
			Some(SessionError::AttemptRunning)
		);
		drop(guard);
		assert!(session.try_begin_attempt().is_ok());
	}

	#[tokio::test]
	async fn test_presence_wakes_waiters() {
		let session = Arc::new(FundingSession::new(SessionRecord::new(
			SessionId::new(),
			"trader",
		)));
		let waiter = tokio::spawn({
			let session = session.clone();
			async move { session.presence_changed().await }
		});
		tokio::task::yield_now().await;

		session
			.set_presence(Presence {
				service_active: true,
				visibility: Visibility::Hidden,
			})
			.await;
		tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
			.await
			.unwrap()
			.unwrap();
		assert!(session.presence().await.service_active);
	}
}
