//! Display step descriptors rendered by the client.

use serde::{Deserialize, Serialize};

/// Progress marker of a displayed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
	Wait,
	Process,
	Finish,
	Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStep {
	pub description: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub explorer_link: Option<String>,
}

/// One rendered step, typically one per bridged token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
	pub title: String,
	pub status: StepStatus,
	#[serde(default)]
	pub sub_steps: Vec<SubStep>,
}

impl StepDescriptor {
	pub fn new(title: impl Into<String>, status: StepStatus) -> Self {
		Self {
			title: title.into(),
			status,
			sub_steps: Vec::new(),
		}
	}
}
