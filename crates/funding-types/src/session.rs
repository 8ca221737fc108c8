//! Funding session identity and user-facing flow state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one funding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for SessionId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s).map(SessionId)
	}
}

/// What the user sees while a funding session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
	/// Waiting for the user to deposit into the external wallet.
	Depositing,
	/// A bridge bundle is being executed.
	InProgress,
	Completed,
}

impl fmt::Display for FlowState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlowState::Depositing => f.write_str("depositing"),
			FlowState::InProgress => f.write_str("in_progress"),
			FlowState::Completed => f.write_str("completed"),
		}
	}
}
