//! The funding engine.
//!
//! One tick reads balances, rewards and in-flight credits, computes the
//! agent's requirements and publishes them. A funding attempt plans bridge
//! requests from the refill requirement of a fresh tick, runs them through a
//! [`BridgeOrchestrator`] and moves the session's flow according to how the
//! bundle settles.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use funding_balances::{compute_requirements, AggregationError, BalanceError, BalanceService};
use funding_balances::RewardsRegistry;
use funding_bridge::{
	classify, BridgeFailure, BridgeInterface, BridgeOrchestrator, FailureCause, FailureStage,
	OrchestratorError,
};
use funding_config::{AgentConfig, Config};
use funding_planner::{DirectDeposit, PlanContext, PlanError, TokenTable};
use funding_scheduler::{PollInputs, PollPolicy, PollSubject};
use funding_storage::StorageError;
use funding_types::{
	BridgeRequest, BridgeState, Credit, CreditKind, EventBus, FlowEvent, FlowState, FundingEvent,
	Holder, QuoteId, Requirements, RequirementsEvent, RetryOutcome, SessionId, TargetConfig,
	TokenAmount, WalletRef, WalletRole,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{FundingSession, SessionError, SessionRecord, SessionView};
use crate::store::SessionStore;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Unknown agent '{0}'")]
	UnknownAgent(String),
	#[error("Unknown session {0}")]
	UnknownSession(SessionId),
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error("Balance source error: {0}")]
	Balances(#[from] BalanceError),
	#[error(transparent)]
	Requirements(#[from] AggregationError),
	#[error(transparent)]
	Plan(#[from] PlanError),
	#[error(transparent)]
	Bridge(#[from] OrchestratorError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Nothing to retry: {0}")]
	NothingToRetry(String),
}

/// Requirements of one tick plus the flags the display layer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
	pub requirements: Requirements,
	pub is_refill_required: bool,
	pub allow_start: bool,
	/// Every rewards oracle reports the agent as eligible.
	pub is_eligible: bool,
	pub assessed_at: DateTime<Utc>,
}

/// How a funding attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FundingOutcome {
	/// Nothing is missing, or nothing missing can be bridged.
	NothingToFund,
	/// Every missing amount sits on the source chain and has to be deposited
	/// there directly.
	DirectDepositRequired { deposits: Vec<DirectDeposit> },
	QuoteFailed { failure: Option<BridgeFailure> },
	Completed { quote_id: Option<QuoteId> },
	/// The source wallet lacked funds. The flow is back in Depositing.
	NeedRefill { failure: Option<BridgeFailure> },
	/// The same quote can be executed again.
	RetryAvailable { failure: Option<BridgeFailure> },
}

pub struct FundingEngine {
	config: Config,
	balances: BalanceService,
	/// Rewards oracles per agent id.
	rewards: HashMap<String, RewardsRegistry>,
	bridge: Arc<dyn BridgeInterface>,
	routes: TokenTable,
	store: SessionStore,
	policy: PollPolicy,
	event_bus: EventBus,
	sessions: DashMap<SessionId, Arc<FundingSession>>,
}

impl FundingEngine {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		config: Config,
		balances: BalanceService,
		rewards: HashMap<String, RewardsRegistry>,
		bridge: Arc<dyn BridgeInterface>,
		routes: TokenTable,
		store: SessionStore,
		policy: PollPolicy,
		event_bus: EventBus,
	) -> Self {
		Self {
			config,
			balances,
			rewards,
			bridge,
			routes,
			store,
			policy,
			event_bus,
			sessions: DashMap::new(),
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	fn agent(&self, agent_id: &str) -> Result<&AgentConfig, EngineError> {
		self.config
			.agent(agent_id)
			.ok_or_else(|| EngineError::UnknownAgent(agent_id.to_string()))
	}

	pub async fn open_session(&self, agent_id: &str) -> Result<Arc<FundingSession>, EngineError> {
		self.agent(agent_id)?;
		let record = SessionRecord::new(SessionId::new(), agent_id);
		self.store.save(&record).await?;

		let session = Arc::new(FundingSession::new(record));
		self.sessions.insert(session.id(), session.clone());
		info!(session_id = %session.id(), agent_id, "Funding session opened");
		Ok(session)
	}

	pub fn session(&self, id: SessionId) -> Result<Arc<FundingSession>, EngineError> {
		self.sessions
			.get(&id)
			.map(|entry| entry.value().clone())
			.ok_or(EngineError::UnknownSession(id))
	}

	pub fn sessions(&self) -> Vec<Arc<FundingSession>> {
		self.sessions
			.iter()
			.map(|entry| entry.value().clone())
			.collect()
	}

	/// View of a live session, or of a record the store still holds.
	pub async fn session_view(&self, id: SessionId) -> Result<SessionView, EngineError> {
		if let Ok(session) = self.session(id) {
			return Ok(session.view().await);
		}
		let record = self
			.store
			.load(id)
			.await?
			.ok_or(EngineError::UnknownSession(id))?;
		Ok(SessionView {
			record,
			presence: Default::default(),
			assessment: None,
			bridge: None,
		})
	}

	/// Cancels every poll of the session and forgets it.
	pub async fn close_session(&self, id: SessionId) -> Result<(), EngineError> {
		let (_, session) = self
			.sessions
			.remove(&id)
			.ok_or(EngineError::UnknownSession(id))?;
		session.close();
		self.store.remove(id).await?;
		info!(session_id = %id, "Funding session closed");
		Ok(())
	}

	/// Targets with staking deposits and bonds read from the rewards oracles
	/// where the configuration leaves them out.
	async fn targets(&self, agent: &AgentConfig) -> TargetConfig {
		let mut targets = agent.targets();
		let Some(registry) = self.rewards.get(&agent.id) else {
			return targets;
		};
		let details = registry.staking_details(&agent.id).await;
		for wallet in targets
			.wallets
			.iter_mut()
			.filter(|wallet| wallet.role == WalletRole::MasterCustodial)
		{
			if let Some(found) = details.get(&wallet.chain) {
				wallet
					.stake_deposit
					.get_or_insert(TokenAmount::new(found.token, found.min_staking_deposit));
				wallet
					.bond
					.get_or_insert(TokenAmount::new(found.token, found.bond));
			}
		}
		targets
	}

	/// Runs one aggregation for `agent`. The balance snapshot is taken once
	/// and shared by everything computed from it.
	async fn compute_assessment(
		&self,
		agent: &AgentConfig,
		in_flight: Vec<Credit>,
	) -> Result<Assessment, EngineError> {
		let targets = self.targets(agent).await;
		let wallets: Vec<WalletRef> = targets
			.wallets
			.iter()
			.filter_map(|wallet| {
				wallet.address.map(|address| WalletRef {
					chain: wallet.chain,
					address,
				})
			})
			.collect();
		let snapshot = self.balances.fetch_snapshot(&wallets).await?;

		let (mut credits, is_eligible) = match self.rewards.get(&agent.id) {
			Some(registry) => {
				let holder = rewards_holder(agent, &targets);
				match registry.collect(&agent.id, holder).await {
					Ok(summary) => (summary.credits, summary.is_eligible),
					Err(e) => {
						warn!(agent_id = %agent.id, "Rewards unavailable, assessing without credits: {}", e);
						(Vec::new(), false)
					}
				}
			}
			None => (Vec::new(), true),
		};
		credits.extend(in_flight);

		let requirements = compute_requirements(Some(&snapshot), Some(&targets), &credits)?;
		Ok(Assessment {
			is_refill_required: requirements.is_refill_required(),
			allow_start: requirements.allow_start(),
			requirements,
			is_eligible,
			assessed_at: snapshot.fetched_at,
		})
	}

	/// One tick for `session`: computes requirements, stores them on the
	/// session and publishes them. Amounts being bridged count as held
	/// while the flow is in progress.
	pub async fn assess(&self, session: &FundingSession) -> Result<Assessment, EngineError> {
		let agent = self.agent(session.agent_id())?;
		let in_flight = match session.flow_state().await {
			FlowState::InProgress => session.in_flight().await,
			FlowState::Depositing | FlowState::Completed => Vec::new(),
		};

		match self.compute_assessment(agent, in_flight).await {
			Ok(assessment) => {
				session.set_assessment(Some(assessment.clone())).await;
				self.event_bus
					.publish(FundingEvent::Requirements(RequirementsEvent::Computed {
						session_id: session.id(),
						requirements: assessment.requirements.clone(),
					}))
					.ok();
				Ok(assessment)
			}
			Err(e) => {
				warn!(session_id = %session.id(), "Requirements unavailable: {}", e);
				self.event_bus
					.publish(FundingEvent::Requirements(RequirementsEvent::Unavailable {
						session_id: session.id(),
						reason: e.to_string(),
					}))
					.ok();
				Err(e)
			}
		}
	}

	fn plan_context(&self, agent: &AgentConfig) -> PlanContext {
		PlanContext {
			source_chain: self.config.bridge.source_chain,
			master_eoa: agent.master_eoa,
			master_safe: agent.master_safe,
			recipient: self.config.bridge.recipient,
		}
	}

	/// Runs one tick for `agent_id` outside of any session and plans the
	/// requests that would cover its refill.
	pub async fn preview(
		&self,
		agent_id: &str,
	) -> Result<(Assessment, Vec<BridgeRequest>), EngineError> {
		let agent = self.agent(agent_id)?;
		let assessment = self.compute_assessment(agent, Vec::new()).await?;
		let requests = funding_planner::plan(
			&assessment.requirements.refill,
			&self.routes,
			&self.plan_context(agent),
		)?;
		Ok((assessment, requests))
	}

	/// Starts a funding attempt and drives it until the bundle settles.
	///
	/// Only one attempt runs per session. The plan is built from a tick taken
	/// here, never from an older assessment.
	pub async fn fund(&self, session_id: SessionId) -> Result<FundingOutcome, EngineError> {
		let session = self.session(session_id)?;
		let _attempt = session.try_begin_attempt()?;

		let from = session.flow_state().await;
		if from != FlowState::Depositing {
			return Err(SessionError::InvalidFlow {
				from,
				to: FlowState::InProgress,
			}
			.into());
		}

		let assessment = self.assess(&session).await?;
		if !assessment.is_refill_required {
			info!(session_id = %session_id, "Nothing to fund");
			return Ok(FundingOutcome::NothingToFund);
		}

		let agent = self.agent(session.agent_id())?;
		let context = self.plan_context(agent);
		let requests =
			funding_planner::plan(&assessment.requirements.refill, &self.routes, &context)?;
		let deposits = funding_planner::direct_deposits(&assessment.requirements.refill, &context);
		if requests.is_empty() {
			if deposits.is_empty() {
				info!(session_id = %session_id, "No deficit can be bridged");
				return Ok(FundingOutcome::NothingToFund);
			}
			info!(
				session_id = %session_id,
				deposits = deposits.len(),
				"Deficits need a direct deposit"
			);
			return Ok(FundingOutcome::DirectDepositRequired { deposits });
		}
		if !deposits.is_empty() {
			info!(
				session_id = %session_id,
				deposits = deposits.len(),
				"Bridging what it can, the source chain still needs a direct deposit"
			);
		}

		let in_flight: Vec<Credit> = assessment
			.requirements
			.refill
			.iter()
			.filter(|(chain, holder, _, _)| context.covers(*chain, holder))
			.map(|(chain, holder, token, amount)| Credit {
				chain,
				holder: *holder,
				token: *token,
				amount,
				kind: CreditKind::InFlight,
			})
			.collect();
		session.set_in_flight(in_flight).await;

		let labels = funding_planner::transfer_summary(&requests, &self.routes, None)
			.map(|summary| {
				summary
					.transfers
					.into_iter()
					.map(|transfer| transfer.to_symbol)
					.collect()
			})
			.unwrap_or_default();
		let orchestrator = Arc::new(
			BridgeOrchestrator::new(
				session_id,
				self.bridge.clone(),
				self.event_bus.clone(),
				session.cancel_signal().clone(),
			)
			.with_labels(labels),
		);
		session.set_orchestrator(Some(orchestrator.clone())).await;

		self.quote_and_execute(&session, &orchestrator, requests, false)
			.await
	}

	/// Asks for a quote and executes it when one comes back.
	async fn quote_and_execute(
		&self,
		session: &FundingSession,
		orchestrator: &BridgeOrchestrator,
		requests: Vec<BridgeRequest>,
		force_update: bool,
	) -> Result<FundingOutcome, EngineError> {
		let state = orchestrator.submit(requests, force_update).await?;
		if state == BridgeState::QuoteFailed {
			return self.quote_failed(session, orchestrator).await;
		}
		self.execute_quoted(session, orchestrator).await
	}

	/// Executes the orchestrator's current quote, entering InProgress first.
	///
	/// A quote that expired before execution is replaced once with a forced
	/// fresh quote. If that one expires too, the attempt is released back to
	/// Depositing and left for [`retry`](Self::retry).
	async fn execute_quoted(
		&self,
		session: &FundingSession,
		orchestrator: &BridgeOrchestrator,
	) -> Result<FundingOutcome, EngineError> {
		let mut requoted = false;
		loop {
			let Some(bundle) = orchestrator.bundle().await else {
				return Err(EngineError::NothingToRetry("no quote to execute".to_string()));
			};
			let summary =
				funding_planner::transfer_summary(&bundle.requests, &self.routes, bundle.eta());
			let quote_id = bundle.id.clone();
			self.move_flow(session, |record| record.begin(quote_id, summary))
				.await?;

			match orchestrator.execute(&bundle.id).await {
				Err(OrchestratorError::QuoteExpired(quote_id)) if !requoted => {
					info!(
						session_id = %session.id(),
						quote_id = %quote_id,
						"Quote expired before execution, requesting a fresh one"
					);
					requoted = true;
					let requests = orchestrator.requests().await;
					if orchestrator.submit(requests, true).await? == BridgeState::QuoteFailed {
						return self.quote_failed(session, orchestrator).await;
					}
				}
				Err(OrchestratorError::QuoteExpired(quote_id)) => {
					warn!(
						session_id = %session.id(),
						quote_id = %quote_id,
						"Fresh quote expired before execution"
					);
					self.release_unexecuted(session).await?;
					return Ok(FundingOutcome::RetryAvailable {
						failure: Some(BridgeFailure {
							stage: FailureStage::Execute,
							cause: FailureCause::QuoteExpired,
							message: format!("quote {} expired before execution", quote_id),
							request_index: None,
							explorer_link: None,
						}),
					});
				}
				result => {
					let state = result?;
					return self.observe(session, orchestrator, state).await;
				}
			}
		}
	}

	async fn quote_failed(
		&self,
		session: &FundingSession,
		orchestrator: &BridgeOrchestrator,
	) -> Result<FundingOutcome, EngineError> {
		self.release_unexecuted(session).await?;
		Ok(FundingOutcome::QuoteFailed {
			failure: orchestrator.failure().await,
		})
	}

	/// Moves an attempt whose current quote never executed back to
	/// Depositing, so nothing counts as in flight. The orchestrator stays on
	/// the session for a retry.
	async fn release_unexecuted(&self, session: &FundingSession) -> Result<(), EngineError> {
		self.move_flow(session, |record| {
			record.last_outcome = Some(RetryOutcome::Transient);
			record.transition(FlowState::Depositing)
		})
		.await?;
		Ok(())
	}

	/// Waits for the bundle to settle, then applies the result to the flow.
	async fn observe(
		&self,
		session: &FundingSession,
		orchestrator: &BridgeOrchestrator,
		state: BridgeState,
	) -> Result<FundingOutcome, EngineError> {
		let state = if state.is_terminal() {
			state
		} else {
			orchestrator
				.wait_until_terminal(self.config.bridge.status_interval())
				.await?
		};
		self.settle(session, orchestrator, state).await
	}

	async fn settle(
		&self,
		session: &FundingSession,
		orchestrator: &BridgeOrchestrator,
		state: BridgeState,
	) -> Result<FundingOutcome, EngineError> {
		if state == BridgeState::Done {
			let quote_id = self
				.move_flow(session, |record| {
					record.transition(FlowState::Completed)?;
					Ok(record.quote_id.clone())
				})
				.await?;
			session.set_in_flight(Vec::new()).await;
			return Ok(FundingOutcome::Completed { quote_id });
		}

		let failure = orchestrator.failure().await;
		let outcome = failure
			.as_ref()
			.map(|failure| classify(failure.cause))
			.unwrap_or(RetryOutcome::Transient);
		info!(session_id = %session.id(), ?outcome, "Bridge attempt failed");
		self.event_bus
			.publish(FundingEvent::Flow(FlowEvent::RetryClassified {
				session_id: session.id(),
				outcome,
			}))
			.ok();

		match outcome {
			RetryOutcome::NeedRefill => {
				self.move_flow(session, |record| {
					record.last_outcome = Some(RetryOutcome::NeedRefill);
					record.transition(FlowState::Depositing)
				})
				.await?;
				session.set_in_flight(Vec::new()).await;
				session.set_orchestrator(None).await;
				Ok(FundingOutcome::NeedRefill { failure })
			}
			RetryOutcome::Transient => {
				self.move_flow(session, |record| {
					record.last_outcome = Some(RetryOutcome::Transient);
					Ok(record.flow_state)
				})
				.await?;
				Ok(FundingOutcome::RetryAvailable { failure })
			}
		}
	}

	/// Retries the session's failed attempt.
	///
	/// A failed, expired or never executed quote is requested again with
	/// `force_update`. A bundle that failed during execution is executed
	/// again under the same quote id.
	pub async fn retry(&self, session_id: SessionId) -> Result<FundingOutcome, EngineError> {
		let session = self.session(session_id)?;
		let _attempt = session.try_begin_attempt()?;
		let orchestrator = session
			.orchestrator()
			.await
			.ok_or_else(|| EngineError::NothingToRetry("no bridge attempt".to_string()))?;

		let state = orchestrator.state().await;
		let expired = orchestrator
			.failure()
			.await
			.is_some_and(|failure| failure.cause == FailureCause::QuoteExpired);
		match state {
			BridgeState::QuoteFailed | BridgeState::Quoted => {
				self.requote(&session, &orchestrator).await
			}
			BridgeState::Failed if expired => self.requote(&session, &orchestrator).await,
			BridgeState::Failed => {
				let quote_id = orchestrator
					.quote_id()
					.await
					.ok_or_else(|| EngineError::NothingToRetry("no quote".to_string()))?;
				info!(session_id = %session_id, quote_id = %quote_id, "Executing quote again");
				match orchestrator.execute(&quote_id).await {
					Err(OrchestratorError::QuoteExpired(_)) => {
						self.requote(&session, &orchestrator).await
					}
					result => {
						let state = result?;
						self.observe(&session, &orchestrator, state).await
					}
				}
			}
			other => Err(EngineError::NothingToRetry(format!("bridge is {}", other))),
		}
	}

	async fn requote(
		&self,
		session: &FundingSession,
		orchestrator: &BridgeOrchestrator,
	) -> Result<FundingOutcome, EngineError> {
		info!(session_id = %session.id(), "Requesting a fresh quote");
		let requests = orchestrator.requests().await;
		self.quote_and_execute(session, orchestrator, requests, true)
			.await
	}

	/// Applies `update` to the session record, then persists it and
	/// announces a flow change.
	async fn move_flow<T>(
		&self,
		session: &FundingSession,
		update: impl FnOnce(&mut SessionRecord) -> Result<T, SessionError>,
	) -> Result<T, EngineError> {
		let from = session.flow_state().await;
		let (result, record) = session.update_record(update).await?;
		if record.flow_state != from {
			info!(
				session_id = %record.id,
				quote_id = ?record.quote_id,
				%from,
				to = %record.flow_state,
				"Flow state changed"
			);
			self.event_bus
				.publish(FundingEvent::Flow(FlowEvent::Changed {
					session_id: record.id,
					from,
					to: record.flow_state,
				}))
				.ok();
		}
		self.store.save(&record).await?;
		Ok(result)
	}

	/// Re-assesses the session on the adaptive cadence until it is closed.
	///
	/// Presence updates wake the loop early so a newly focused window gets
	/// fresh data without waiting out a long idle interval.
	pub async fn monitor(&self, session: Arc<FundingSession>) {
		let has_subject = self
			.config
			.agent(session.agent_id())
			.is_some_and(|agent| agent.wallets.iter().any(|w| w.address.is_some()));
		let mut subject = PollSubject::new(self.policy.clone());
		let cancel = session.cancel_signal().clone();

		loop {
			if cancel.is_cancelled() {
				break;
			}
			let presence = session.presence().await;
			let (goal_reached, data_stale) = if has_subject {
				match self.assess(&session).await {
					Ok(assessment) => (assessment.is_eligible, assessment.requirements.is_stale),
					Err(_) => (false, true),
				}
			} else {
				(false, false)
			};

			let interval = subject.tick(&PollInputs {
				has_subject,
				service_active: presence.service_active,
				goal_reached,
				data_stale,
				visibility: presence.visibility,
			});
			debug!(session_id = %session.id(), ?interval, "Next requirements poll");

			match interval.duration() {
				Some(wait) => tokio::select! {
					_ = cancel.cancelled() => break,
					_ = session.presence_changed() => {}
					_ = tokio::time::sleep(wait) => {}
				},
				None => tokio::select! {
					_ = cancel.cancelled() => break,
					_ = session.presence_changed() => {}
				},
			}
		}
		debug!(session_id = %session.id(), "Requirements polling stopped");
	}

	pub fn spawn_monitor(self: &Arc<Self>, session: Arc<FundingSession>) -> JoinHandle<()> {
		let engine = self.clone();
		tokio::spawn(async move { engine.monitor(session).await })
	}
}

/// Holder credited with rewards: the custodial safe the rewards are claimed to.
fn rewards_holder(agent: &AgentConfig, targets: &TargetConfig) -> Holder {
	targets
		.wallets
		.iter()
		.find(|wallet| wallet.role == WalletRole::MasterCustodial)
		.map(|wallet| wallet.holder())
		.unwrap_or_else(|| Holder::from(agent.master_safe))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{FundingBuilder, Presence};
	use async_trait::async_trait;
	use funding_balances::BalanceInterface;
	use funding_bridge::BridgeError;
	use funding_storage::implementations::memory;
	use funding_types::{
		Address, Amount, BalanceSnapshot, BridgeRequestStatus, ConfigSchema, ProviderErrorCode,
		QuoteBundle, RequestStatusEntry, ValidationError, NATIVE_TOKEN,
	};
	use std::collections::{BTreeMap, VecDeque};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;
	use std::time::Duration;

	const ONE: u128 = 1_000_000_000_000_000_000;

	fn safe() -> Address {
		Address::repeat_byte(0x5a)
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, _config: &toml::Value) -> Result<(), ValidationError> {
			Ok(())
		}
	}

	#[derive(Default)]
	struct Balances {
		native: Mutex<BTreeMap<WalletRef, Amount>>,
		calls: AtomicUsize,
	}

	impl Balances {
		fn set(&self, chain: u64, address: Address, amount: u128) {
			self.native.lock().unwrap().insert(
				WalletRef {
					chain: funding_types::ChainId(chain),
					address,
				},
				Amount::from(amount),
			);
		}
	}

	struct SharedBalances(Arc<Balances>);

	#[async_trait]
	impl BalanceInterface for SharedBalances {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn get_balances(
			&self,
			wallets: &[WalletRef],
		) -> Result<BalanceSnapshot, BalanceError> {
			self.0.calls.fetch_add(1, Ordering::SeqCst);
			let native = self.0.native.lock().unwrap();
			let mut snapshot = BalanceSnapshot::new(Utc::now());
			for wallet in wallets {
				let amount = native.get(wallet).copied().unwrap_or(Amount::ZERO);
				snapshot.insert(*wallet, NATIVE_TOKEN, amount);
			}
			Ok(snapshot)
		}
	}

	type Reply = Result<Vec<RequestStatusEntry>, BridgeError>;

	#[derive(Default)]
	struct Script {
		quotes: VecDeque<Reply>,
		executes: VecDeque<Reply>,
		statuses: VecDeque<Reply>,
		force_flags: Vec<bool>,
		executed: Vec<QuoteId>,
		/// How many of the first quotes come back already expired.
		expired_quotes: usize,
	}

	struct ScriptedBridge(Arc<Mutex<Script>>);

	fn exhausted() -> Reply {
		Err(BridgeError::Transport("script exhausted".into()))
	}

	#[async_trait]
	impl BridgeInterface for ScriptedBridge {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn quote(
			&self,
			requests: &[BridgeRequest],
			force_update: bool,
		) -> Result<QuoteBundle, BridgeError> {
			let mut script = self.0.lock().unwrap();
			script.force_flags.push(force_update);
			let statuses = script.quotes.pop_front().unwrap_or_else(exhausted)?;
			let number = script.force_flags.len();
			Ok(QuoteBundle {
				id: QuoteId(format!("q{}", number)),
				requests: requests.to_vec(),
				statuses,
				expires_at: (number <= script.expired_quotes)
					.then(|| Utc::now() - chrono::Duration::seconds(1)),
			})
		}

		async fn execute(&self, quote_id: &QuoteId) -> Reply {
			let mut script = self.0.lock().unwrap();
			script.executed.push(quote_id.clone());
			script.executes.pop_front().unwrap_or_else(exhausted)
		}

		async fn status(&self, _quote_id: &QuoteId) -> Reply {
			self.0.lock().unwrap().statuses.pop_front().unwrap_or_else(exhausted)
		}
	}

	fn entries(status: BridgeRequestStatus) -> Reply {
		Ok(vec![RequestStatusEntry {
			eta: Some(60),
			..RequestStatusEntry::new(status)
		}])
	}

	const CONFIG: &str = r#"
		[service]

		[balances]
		implementation = "mock"

		[bridge]
		implementation = "scripted"
		source_chain = 1
		status_interval_secs = 1

		[tokens.1.ETH]
		address = "0x0000000000000000000000000000000000000000"
		decimals = 18

		[tokens.100.XDAI]
		address = "0x0000000000000000000000000000000000000000"
		decimals = 18

		[[agents]]
		id = "trader"
		home_chain = 100
		master_eoa = "0xe0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0"
		master_safe = "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a"

		[[agents.wallets]]
		chain = 100
		role = "master_custodial"
		address = "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a"
		native = "105000000000000000000"
	"#;

	struct Harness {
		engine: Arc<FundingEngine>,
		balances: Arc<Balances>,
		script: Arc<Mutex<Script>>,
	}

	fn harness_with(config: &str) -> Harness {
		let config: Config = toml::from_str(config).unwrap();
		let balances = Arc::new(Balances::default());
		let script = Arc::new(Mutex::new(Script::default()));

		let engine = FundingBuilder::new(config)
			.with_storage_factory("memory", memory::create_storage)
			.with_balance_factory("mock", {
				let balances = balances.clone();
				move |_: &toml::Value| -> Box<dyn BalanceInterface> {
					Box::new(SharedBalances(balances.clone()))
				}
			})
			.with_bridge_factory("scripted", {
				let script = script.clone();
				move |_: &toml::Value| -> Box<dyn BridgeInterface> {
					Box::new(ScriptedBridge(script.clone()))
				}
			})
			.with_rewards_factory(
				"fixed",
				funding_balances::implementations::rewards::fixed::create_oracle,
			)
			.build()
			.unwrap();

		Harness {
			engine: Arc::new(engine),
			balances,
			script,
		}
	}

	fn harness() -> Harness {
		harness_with(CONFIG)
	}

	fn script(harness: &Harness) -> std::sync::MutexGuard<'_, Script> {
		harness.script.lock().unwrap()
	}

	#[tokio::test]
	async fn test_nothing_to_fund_never_calls_provider() {
		let h = harness();
		h.balances.set(100, safe(), 105 * ONE);
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();

		assert_eq!(outcome, FundingOutcome::NothingToFund);
		assert!(script(&h).force_flags.is_empty());
		assert_eq!(session.flow_state().await, FlowState::Depositing);
		let assessment = session.assessment().await.unwrap();
		assert!(assessment.allow_start);
		assert!(!assessment.is_refill_required);
	}

	#[tokio::test]
	async fn test_fund_completes_and_records_transfer() {
		let h = harness();
		{
			let mut script = script(&h);
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script
				.executes
				.push_back(entries(BridgeRequestStatus::ExecutionDone));
		}
		let session = h.engine.open_session("trader").await.unwrap();
		let mut events = h.engine.event_bus().subscribe();

		let outcome = h.engine.fund(session.id()).await.unwrap();

		assert_eq!(
			outcome,
			FundingOutcome::Completed {
				quote_id: Some(QuoteId::from("q1"))
			}
		);
		let record = session.record().await;
		assert_eq!(record.flow_state, FlowState::Completed);
		let transfer = record.transfer.unwrap();
		assert_eq!(transfer.from_chain, funding_types::ChainId::ETHEREUM);
		assert_eq!(transfer.to_chain, funding_types::ChainId::GNOSIS);
		assert_eq!(transfer.transfers[0].to_symbol, "XDAI");
		assert_eq!(transfer.transfers[0].display_amount, "105");
		assert_eq!(transfer.eta, Some(60));
		assert!(session.in_flight().await.is_empty());
		assert_eq!(script(&h).force_flags, vec![false]);

		let mut flow = Vec::new();
		while let Ok(event) = events.try_recv() {
			if let FundingEvent::Flow(FlowEvent::Changed { from, to, .. }) = event {
				flow.push((from, to));
			}
		}
		assert_eq!(
			flow,
			vec![
				(FlowState::Depositing, FlowState::InProgress),
				(FlowState::InProgress, FlowState::Completed),
			]
		);

		let view = h.engine.session_view(session.id()).await.unwrap();
		assert_eq!(view.bridge.unwrap().state, BridgeState::Done);

		// A completed session cannot start another attempt.
		assert!(matches!(
			h.engine.fund(session.id()).await,
			Err(EngineError::Session(SessionError::InvalidFlow { .. }))
		));
	}

	#[tokio::test]
	async fn test_need_refill_returns_to_depositing() {
		let h = harness();
		{
			let mut script = script(&h);
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script.executes.push_back(Ok(vec![RequestStatusEntry {
				error: Some(ProviderErrorCode::InsufficientFunds),
				..RequestStatusEntry::new(BridgeRequestStatus::ExecutionFailed)
			}]));
		}
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();

		assert!(matches!(outcome, FundingOutcome::NeedRefill { .. }));
		let record = session.record().await;
		assert_eq!(record.flow_state, FlowState::Depositing);
		assert!(record.quote_id.is_none());
		assert!(record.transfer.is_none());
		assert_eq!(record.last_outcome, Some(RetryOutcome::NeedRefill));
		assert!(session.orchestrator().await.is_none());
		assert!(session.in_flight().await.is_empty());

		// The next attempt works from the latest balances.
		h.balances.set(100, safe(), 105 * ONE);
		assert_eq!(
			h.engine.fund(session.id()).await.unwrap(),
			FundingOutcome::NothingToFund
		);
	}

	#[tokio::test]
	async fn test_transient_failure_keeps_quote_for_retry() {
		let h = harness();
		{
			let mut script = script(&h);
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script
				.executes
				.push_back(Err(BridgeError::Transport("connection reset".into())));
			script
				.executes
				.push_back(entries(BridgeRequestStatus::ExecutionPending));
			script
				.statuses
				.push_back(entries(BridgeRequestStatus::ExecutionDone));
		}
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();
		assert!(matches!(outcome, FundingOutcome::RetryAvailable { .. }));
		let record = session.record().await;
		assert_eq!(record.flow_state, FlowState::InProgress);
		assert_eq!(record.quote_id, Some(QuoteId::from("q1")));
		assert_eq!(record.last_outcome, Some(RetryOutcome::Transient));

		// The amount being bridged counts as held while in progress.
		let assessment = h.engine.assess(&session).await.unwrap();
		assert!(!assessment.is_refill_required);

		let outcome = h.engine.retry(session.id()).await.unwrap();
		assert_eq!(
			outcome,
			FundingOutcome::Completed {
				quote_id: Some(QuoteId::from("q1"))
			}
		);
		let script = script(&h);
		assert_eq!(script.force_flags, vec![false]);
		assert_eq!(
			script.executed,
			vec![QuoteId::from("q1"), QuoteId::from("q1")]
		);
	}

	#[tokio::test]
	async fn test_failed_quote_is_requested_again_with_force_update() {
		let h = harness();
		{
			let mut script = script(&h);
			script.quotes.push_back(Err(BridgeError::Rejected {
				message: "no route".into(),
				code: Some(ProviderErrorCode::RouteUnavailable),
			}));
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script
				.executes
				.push_back(entries(BridgeRequestStatus::ExecutionDone));
		}
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();
		let FundingOutcome::QuoteFailed { failure } = outcome else {
			panic!("expected a failed quote, got {:?}", outcome);
		};
		assert_eq!(failure.unwrap().cause, FailureCause::RouteUnavailable);
		assert_eq!(session.flow_state().await, FlowState::Depositing);

		let outcome = h.engine.retry(session.id()).await.unwrap();
		assert_eq!(
			outcome,
			FundingOutcome::Completed {
				quote_id: Some(QuoteId::from("q2"))
			}
		);
		assert_eq!(script(&h).force_flags, vec![false, true]);
	}

	#[tokio::test]
	async fn test_expired_quote_is_replaced_before_execution() {
		let h = harness();
		{
			let mut script = script(&h);
			script.expired_quotes = 1;
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script
				.executes
				.push_back(entries(BridgeRequestStatus::ExecutionDone));
		}
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();

		assert_eq!(
			outcome,
			FundingOutcome::Completed {
				quote_id: Some(QuoteId::from("q2"))
			}
		);
		let script = script(&h);
		assert_eq!(script.force_flags, vec![false, true]);
		assert_eq!(script.executed, vec![QuoteId::from("q2")]);
	}

	#[tokio::test]
	async fn test_quote_expiring_again_is_left_for_retry() {
		let h = harness();
		{
			let mut script = script(&h);
			script.expired_quotes = 2;
			for _ in 0..3 {
				script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			}
			script
				.executes
				.push_back(entries(BridgeRequestStatus::ExecutionDone));
		}
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();
		let FundingOutcome::RetryAvailable { failure } = outcome else {
			panic!("expected a retryable outcome, got {:?}", outcome);
		};
		assert_eq!(failure.unwrap().cause, FailureCause::QuoteExpired);

		// Nothing executed, so the flow is back in Depositing and the refill
		// is shown in full.
		let record = session.record().await;
		assert_eq!(record.flow_state, FlowState::Depositing);
		assert!(record.quote_id.is_none());
		assert!(script(&h).executed.is_empty());
		let assessment = h.engine.assess(&session).await.unwrap();
		assert!(assessment.is_refill_required);

		let outcome = h.engine.retry(session.id()).await.unwrap();
		assert_eq!(
			outcome,
			FundingOutcome::Completed {
				quote_id: Some(QuoteId::from("q3"))
			}
		);
		let script = script(&h);
		assert_eq!(script.force_flags, vec![false, true, true]);
		assert_eq!(script.executed, vec![QuoteId::from("q3")]);
	}

	#[tokio::test]
	async fn test_retry_after_provider_reports_expired_quote() {
		let h = harness();
		{
			let mut script = script(&h);
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script.quotes.push_back(entries(BridgeRequestStatus::QuoteDone));
			script.executes.push_back(Err(BridgeError::Rejected {
				message: "quote expired".into(),
				code: Some(ProviderErrorCode::QuoteExpired),
			}));
			script
				.executes
				.push_back(entries(BridgeRequestStatus::ExecutionDone));
		}
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();
		let FundingOutcome::RetryAvailable { failure } = outcome else {
			panic!("expected a retryable outcome, got {:?}", outcome);
		};
		assert_eq!(failure.unwrap().cause, FailureCause::QuoteExpired);
		assert_eq!(session.flow_state().await, FlowState::InProgress);

		let outcome = h.engine.retry(session.id()).await.unwrap();
		assert_eq!(
			outcome,
			FundingOutcome::Completed {
				quote_id: Some(QuoteId::from("q2"))
			}
		);
		let script = script(&h);
		assert_eq!(script.force_flags, vec![false, true]);
		assert_eq!(
			script.executed,
			vec![QuoteId::from("q1"), QuoteId::from("q2")]
		);
	}

	#[tokio::test]
	async fn test_source_chain_deficit_asks_for_direct_deposit() {
		let config = format!(
			"{}\n{}",
			CONFIG,
			r#"
			[[agents.wallets]]
			chain = 1
			role = "master_external"
			address = "0xe0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0"
			native = "2000000000000000000"
			"#
		);
		let h = harness_with(&config);
		h.balances.set(100, safe(), 105 * ONE);
		let session = h.engine.open_session("trader").await.unwrap();

		let outcome = h.engine.fund(session.id()).await.unwrap();

		assert_eq!(
			outcome,
			FundingOutcome::DirectDepositRequired {
				deposits: vec![DirectDeposit {
					chain: funding_types::ChainId::ETHEREUM,
					holder: Holder::Wallet(Address::repeat_byte(0xe0)),
					token: NATIVE_TOKEN,
					amount: Amount::from(2 * ONE),
				}]
			}
		);
		assert!(script(&h).force_flags.is_empty());
		assert_eq!(session.flow_state().await, FlowState::Depositing);
	}

	#[tokio::test]
	async fn test_retry_without_attempt() {
		let h = harness();
		let session = h.engine.open_session("trader").await.unwrap();
		assert!(matches!(
			h.engine.retry(session.id()).await,
			Err(EngineError::NothingToRetry(_))
		));
	}

	#[tokio::test]
	async fn test_rewards_credit_the_custodial_safe() {
		let config = format!(
			"{}\n{}",
			CONFIG,
			r#"
			[agents.rewards.100]
			implementation = "fixed"

			[agents.rewards.100.config]
			accrued = "5000000000000000000"
			eligible = true
			"#
		);
		let h = harness_with(&config);
		let session = h.engine.open_session("trader").await.unwrap();

		let assessment = h.engine.assess(&session).await.unwrap();

		assert!(assessment.is_eligible);
		assert_eq!(
			assessment.requirements.refill.get(
				funding_types::ChainId::GNOSIS,
				&Holder::Wallet(safe()),
				&NATIVE_TOKEN
			),
			Amount::from(100 * ONE)
		);
		assert_eq!(
			assessment.requirements.total.get(
				funding_types::ChainId::GNOSIS,
				&Holder::Wallet(safe()),
				&NATIVE_TOKEN
			),
			Amount::from(105 * ONE)
		);
	}

	#[tokio::test]
	async fn test_preview_plans_without_a_session() {
		let h = harness();
		let (assessment, requests) = h.engine.preview("trader").await.unwrap();

		assert!(assessment.is_refill_required);
		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].from.chain, funding_types::ChainId::ETHEREUM);
		assert_eq!(requests[0].to.amount, Amount::from(105 * ONE));
		assert!(h.engine.sessions().is_empty());
	}

	#[tokio::test]
	async fn test_close_session_stops_monitor() {
		let h = harness();
		let session = h.engine.open_session("trader").await.unwrap();
		let id = session.id();
		session
			.set_presence(Presence {
				service_active: true,
				..Presence::default()
			})
			.await;

		let monitor = h.engine.spawn_monitor(session.clone());
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(h.balances.calls.load(Ordering::SeqCst) >= 1);

		h.engine.close_session(id).await.unwrap();
		tokio::time::timeout(Duration::from_secs(1), monitor)
			.await
			.unwrap()
			.unwrap();

		assert!(session.cancel_signal().is_cancelled());
		assert!(matches!(
			h.engine.session_view(id).await,
			Err(EngineError::UnknownSession(_))
		));
	}

	#[tokio::test]
	async fn test_unknown_agent_and_implementation() {
		let h = harness();
		assert!(matches!(
			h.engine.open_session("nobody").await,
			Err(EngineError::UnknownAgent(_))
		));

		let config: Config = toml::from_str(CONFIG).unwrap();
		let result = FundingBuilder::new(config)
			.with_storage_factory("memory", memory::create_storage)
			.build();
		assert!(matches!(result, Err(EngineError::Config(_))));
	}
}
