//! Configuration loading for the funding agent.
//!
//! The configuration is a single TOML file. `${VAR}` references are replaced
//! from the environment before parsing, a handful of settings can be
//! overridden through prefixed environment variables, and the result is
//! validated before anything is built from it.

use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

mod types;

pub use types::*;

/// Largest accepted backoff step ceiling. Keeps `2^step` well inside u64.
pub const MAX_STEP_CEILING: u32 = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "FUNDING_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		let content = match tokio::fs::read_to_string(file_path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(file_path.clone()))
			}
			Err(e) => return Err(e.into()),
		};

		let mut config = self.parse(&content)?;
		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	/// Parses configuration text after substituting environment variables.
	pub fn parse(&self, content: &str) -> Result<Config, ConfigError> {
		let substituted = substitute_env_vars(content)?;
		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			debug!("Overriding log level from environment");
			config.service.log_level = log_level;
		}

		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			config.service.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Ok(url) = env::var(format!("{}MIDDLEWARE_URL", self.env_prefix)) {
			debug!("Overriding middleware URL from environment");
			config.middleware.base_url = url;
		}

		Ok(())
	}
}

fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let mut result = content.to_string();

	let re = regex::Regex::new(r"\$\{([^}]+)\}")
		.map_err(|e| ConfigError::ParseError(e.to_string()))?;

	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let env_value =
			env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

		result = result.replace(full_match, &env_value);
	}

	Ok(result)
}

/// Structural checks that do not depend on which implementations are compiled in.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
	if config.agents.is_empty() {
		return Err(ConfigError::ValidationError(
			"At least one agent must be configured".to_string(),
		));
	}

	if !config.tokens.contains_key(&config.bridge.source_chain) {
		return Err(ConfigError::ValidationError(format!(
			"Bridge source chain {} has no token table",
			config.bridge.source_chain
		)));
	}

	for agent in &config.agents {
		if !config.tokens.contains_key(&agent.home_chain) {
			return Err(ConfigError::ValidationError(format!(
				"Agent '{}' home chain {} has no token table",
				agent.id, agent.home_chain
			)));
		}
		if agent.wallets.is_empty() {
			return Err(ConfigError::ValidationError(format!(
				"Agent '{}' has no wallets",
				agent.id
			)));
		}
	}

	let mut ids: Vec<&str> = config.agents.iter().map(|a| a.id.as_str()).collect();
	ids.sort_unstable();
	if ids.windows(2).any(|pair| pair[0] == pair[1]) {
		return Err(ConfigError::ValidationError(
			"Agent ids must be unique".to_string(),
		));
	}

	let scheduler = &config.scheduler;
	if scheduler.base_interval_secs == 0 {
		return Err(ConfigError::ValidationError(
			"scheduler.base_interval_secs must be greater than zero".to_string(),
		));
	}
	if scheduler.step_ceiling > MAX_STEP_CEILING {
		return Err(ConfigError::ValidationError(format!(
			"scheduler.step_ceiling must be at most {}",
			MAX_STEP_CEILING
		)));
	}
	if scheduler.max_interval_secs < scheduler.base_interval_secs {
		return Err(ConfigError::ValidationError(
			"scheduler.max_interval_secs must not be below base_interval_secs".to_string(),
		));
	}
	if config.bridge.status_interval_secs == 0 {
		return Err(ConfigError::ValidationError(
			"bridge.status_interval_secs must be greater than zero".to_string(),
		));
	}

	Ok(())
}
