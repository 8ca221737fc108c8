use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
	BridgeState, FlowState, QuoteId, Requirements, RetryOutcome, SessionId, StepDescriptor,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FundingEvent {
	Requirements(RequirementsEvent),
	Bridge(BridgeEvent),
	Flow(FlowEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequirementsEvent {
	Computed {
		session_id: SessionId,
		requirements: Requirements,
	},
	Unavailable {
		session_id: SessionId,
		reason: String,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeEvent {
	/// Emitted on every orchestrator state change, carrying the steps to render.
	Transition {
		session_id: SessionId,
		quote_id: Option<QuoteId>,
		from: BridgeState,
		to: BridgeState,
		steps: Vec<StepDescriptor>,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
	Changed {
		session_id: SessionId,
		from: FlowState,
		to: FlowState,
	},
	RetryClassified {
		session_id: SessionId,
		outcome: RetryOutcome,
	},
}

pub struct EventBus {
	sender: broadcast::Sender<FundingEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<FundingEvent> {
		self.sender.subscribe()
	}

	/// Publishes to all current subscribers. Fails only when nobody is listening.
	pub fn publish(
		&self,
		event: FundingEvent,
	) -> Result<(), broadcast::error::SendError<FundingEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_subscribers_receive_published_events() {
		let bus = EventBus::new(8);
		let mut receiver = bus.subscribe();
		let session_id = SessionId::new();

		bus.clone()
			.publish(FundingEvent::Flow(FlowEvent::Changed {
				session_id,
				from: FlowState::Depositing,
				to: FlowState::InProgress,
			}))
			.unwrap();

		match receiver.recv().await.unwrap() {
			FundingEvent::Flow(FlowEvent::Changed { to, .. }) => {
				assert_eq!(to, FlowState::InProgress)
			}
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[test]
	fn test_publish_without_subscribers_errors() {
		let bus = EventBus::new(1);
		assert!(bus
			.publish(FundingEvent::Requirements(RequirementsEvent::Unavailable {
				session_id: SessionId::new(),
				reason: "loading".into(),
			}))
			.is_err());
	}
}
