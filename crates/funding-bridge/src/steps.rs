//! Step descriptors for the display layer.

use funding_types::{
	BridgeRequestStatus, BridgeState, ChainId, RequestStatusEntry, StepDescriptor, StepStatus,
	SubStep,
};

use crate::retry::{BridgeFailure, FailureStage};

/// Inputs needed to render the bridge progress.
pub struct StepsView<'a> {
	pub state: BridgeState,
	pub to_chain: Option<ChainId>,
	pub statuses: &'a [RequestStatusEntry],
	/// Per-request label, usually the destination token symbol.
	pub labels: &'a [String],
	pub failure: Option<&'a BridgeFailure>,
}

/// Renders the quote step and the bridge step.
pub fn bridge_steps(view: &StepsView<'_>) -> Vec<StepDescriptor> {
	vec![quote_step(view), transfer_step(view)]
}

fn quote_step(view: &StepsView<'_>) -> StepDescriptor {
	let status = match view.state {
		BridgeState::Created => StepStatus::Wait,
		BridgeState::QuoteRequested => StepStatus::Process,
		BridgeState::QuoteFailed => StepStatus::Error,
		BridgeState::Quoted
		| BridgeState::Executing
		| BridgeState::PollingStatus
		| BridgeState::Done
		| BridgeState::Failed => StepStatus::Finish,
	};
	let mut step = StepDescriptor::new("Request bridge quote", status);
	if let Some(failure) = view.failure.filter(|f| f.stage == FailureStage::Quote) {
		step.sub_steps.push(SubStep {
			description: format!("Quote failed: {}.", failure.message),
			explorer_link: None,
		});
	}
	step
}

fn transfer_step(view: &StepsView<'_>) -> StepDescriptor {
	let status = match view.state {
		BridgeState::Created
		| BridgeState::QuoteRequested
		| BridgeState::Quoted
		| BridgeState::QuoteFailed => StepStatus::Wait,
		BridgeState::Executing | BridgeState::PollingStatus => StepStatus::Process,
		BridgeState::Done => StepStatus::Finish,
		BridgeState::Failed => StepStatus::Error,
	};
	let title = match view.to_chain {
		Some(chain) => format!("Bridge funds to {}", chain.name()),
		None => "Bridge funds".to_string(),
	};
	let mut step = StepDescriptor::new(title, status);

	if matches!(
		view.state,
		BridgeState::Created
			| BridgeState::QuoteRequested
			| BridgeState::Quoted
			| BridgeState::QuoteFailed
	) {
		return step;
	}

	step.sub_steps = view
		.statuses
		.iter()
		.enumerate()
		.map(|(index, entry)| {
			let label = view
				.labels
				.get(index)
				.cloned()
				.unwrap_or_else(|| format!("transfer {}", index + 1));
			let description = match entry.status {
				BridgeRequestStatus::ExecutionDone => {
					format!("Bridging {} transaction complete.", label)
				}
				BridgeRequestStatus::ExecutionFailed | BridgeRequestStatus::QuoteFailed => {
					format!("Bridging {} failed.", label)
				}
				_ => "Sending transaction...".to_string(),
			};
			SubStep {
				description,
				explorer_link: entry.explorer_link.clone(),
			}
		})
		.collect();

	// The execute call itself failed, so there is no per-request entry to show.
	if let Some(failure) = view
		.failure
		.filter(|f| f.stage != FailureStage::Quote && f.request_index.is_none())
	{
		step.sub_steps.push(SubStep {
			description: format!("Bridging failed: {}.", failure.message),
			explorer_link: failure.explorer_link.clone(),
		});
	}
	step
}
