//! Adaptive poll scheduling.
//!
//! Decides how long a polling subject waits before re-reading remote state.
//! Rules, first match wins:
//!
//! 1. no subject configured: polling is disabled;
//! 2. data known to be stale: a short fixed interval;
//! 3. service active and goal not reached: exponential backoff from the base
//!    interval, bounded by a step ceiling and a hard cap;
//! 4. otherwise: a long idle interval.
//!
//! Every interval is then scaled by how visible the client window is.

use funding_config::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// How visible the client window is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
	#[default]
	Focused,
	/// Shown but not focused.
	Visible,
	Hidden,
}

/// Delay until the next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
	Disabled,
	Every(Duration),
}

impl PollInterval {
	pub fn duration(&self) -> Option<Duration> {
		match self {
			PollInterval::Disabled => None,
			PollInterval::Every(duration) => Some(*duration),
		}
	}
}

/// Conditions observed at a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollInputs {
	/// A wallet or session exists to poll for.
	pub has_subject: bool,
	pub service_active: bool,
	pub goal_reached: bool,
	/// Funding in progress or in its post-funding cooldown.
	pub data_stale: bool,
	pub visibility: Visibility,
}

impl PollInputs {
	fn backing_off(&self) -> bool {
		self.service_active && !self.goal_reached
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
	pub base_interval: Duration,
	pub step_ceiling: u32,
	pub max_interval: Duration,
	pub stale_interval: Duration,
	pub idle_interval: Duration,
	pub visible_multiplier: u32,
	pub hidden_multiplier: u32,
}

impl Default for PollPolicy {
	fn default() -> Self {
		Self::from(&SchedulerConfig::default())
	}
}

impl From<&SchedulerConfig> for PollPolicy {
	fn from(config: &SchedulerConfig) -> Self {
		Self {
			base_interval: Duration::from_secs(config.base_interval_secs),
			step_ceiling: config.step_ceiling,
			max_interval: Duration::from_secs(config.max_interval_secs),
			stale_interval: Duration::from_secs(config.stale_interval_secs),
			idle_interval: Duration::from_secs(config.idle_interval_secs),
			visible_multiplier: config.visible_multiplier,
			hidden_multiplier: config.hidden_multiplier,
		}
	}
}

impl PollPolicy {
	/// Interval for `inputs` at `backoff_step`. Pure.
	///
	/// The hard cap bounds the backoff branch after visibility scaling, so a
	/// persistent condition never polls slower than `max_interval`.
	pub fn next_interval(&self, inputs: &PollInputs, backoff_step: u32) -> PollInterval {
		if !inputs.has_subject {
			return PollInterval::Disabled;
		}
		let interval = if inputs.data_stale {
			self.scale(self.stale_interval, inputs.visibility)
		} else if inputs.backing_off() {
			self.scale(self.backoff(backoff_step), inputs.visibility)
				.min(self.max_interval)
		} else {
			self.scale(self.idle_interval, inputs.visibility)
		};
		PollInterval::Every(interval)
	}

	/// `base * 2^min(step, ceiling)`, capped.
	fn backoff(&self, step: u32) -> Duration {
		let exponent = step.min(self.step_ceiling);
		let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
		self.base_interval
			.checked_mul(factor)
			.unwrap_or(self.max_interval)
			.min(self.max_interval)
	}

	fn scale(&self, interval: Duration, visibility: Visibility) -> Duration {
		let factor = match visibility {
			Visibility::Focused => 1,
			Visibility::Visible => self.visible_multiplier.max(1),
			Visibility::Hidden => self.hidden_multiplier.max(1),
		};
		interval.saturating_mul(factor)
	}
}

/// Backoff state owned by one polling subject.
#[derive(Debug, Clone)]
pub struct PollSubject {
	policy: PollPolicy,
	step: u32,
}

impl PollSubject {
	pub fn new(policy: PollPolicy) -> Self {
		Self { policy, step: 0 }
	}

	/// Interval for this tick.
	///
	/// The step grows by one per tick spent backing off and drops to zero as
	/// soon as the service is inactive or the goal is reached. Stale ticks
	/// leave it untouched.
	pub fn tick(&mut self, inputs: &PollInputs) -> PollInterval {
		let interval = self.policy.next_interval(inputs, self.step);
		if !inputs.backing_off() {
			self.step = 0;
		} else if inputs.has_subject && !inputs.data_stale {
			self.step = self.step.saturating_add(1).min(self.policy.step_ceiling);
		}
		trace!(step = self.step, interval = ?interval, "Poll interval computed");
		interval
	}

	pub fn step(&self) -> u32 {
		self.step
	}

	pub fn reset(&mut self) {
		self.step = 0;
	}

	pub fn policy(&self) -> &PollPolicy {
		&self.policy
	}
}
