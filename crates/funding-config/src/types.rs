//! Configuration structures for the funding agent.

use funding_types::{Address, Amount, ChainId, RecipientPolicy, TargetConfig, WalletTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub service: ServiceSettings,
	#[serde(default)]
	pub middleware: MiddlewareConfig,
	#[serde(default)]
	pub balances: BackendConfig,
	#[serde(default)]
	pub bridge: BridgeConfig,
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	#[serde(default = "default_storage")]
	pub storage: BackendConfig,
	/// Token tables, chain -> symbol -> token.
	pub tokens: BTreeMap<ChainId, BTreeMap<String, TokenConfig>>,
	pub agents: Vec<AgentConfig>,
}

impl Config {
	pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
		self.agents.iter().find(|agent| agent.id == id)
	}

	/// Implementation table of `backend`, with `base_url`, `request_timeout_secs`
	/// and `max_retries` filled from `[middleware]` when the table leaves them out.
	pub fn backend_table(&self, backend: &BackendConfig) -> toml::Value {
		let mut table = match &backend.config {
			toml::Value::Table(table) => table.clone(),
			_ => toml::Table::new(),
		};
		table
			.entry("base_url")
			.or_insert_with(|| toml::Value::String(self.middleware.base_url.clone()));
		table
			.entry("request_timeout_secs")
			.or_insert_with(|| toml::Value::Integer(self.middleware.request_timeout_secs as i64));
		table
			.entry("max_retries")
			.or_insert_with(|| toml::Value::Integer(self.middleware.max_retries as i64));
		toml::Value::Table(table)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
	#[serde(default = "default_service_name")]
	pub name: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,
}

/// The local middleware every HTTP backend talks to unless told otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
	#[serde(default = "default_middleware_url")]
	pub base_url: String,
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
	/// Retries for read-only calls. Quote submission and execution are never retried.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
}

impl Default for MiddlewareConfig {
	fn default() -> Self {
		Self {
			base_url: default_middleware_url(),
			request_timeout_secs: default_request_timeout_secs(),
			max_retries: default_max_retries(),
		}
	}
}

/// A named implementation plus its free-form table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
	#[serde(default = "default_implementation")]
	pub implementation: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			implementation: default_implementation(),
			config: empty_table(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
	#[serde(default = "default_implementation")]
	pub implementation: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
	/// Every bridge request originates on this chain.
	#[serde(default = "default_source_chain")]
	pub source_chain: ChainId,
	#[serde(default = "default_status_interval_secs")]
	pub status_interval_secs: u64,
	#[serde(default)]
	pub recipient: RecipientPolicy,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			implementation: default_implementation(),
			config: empty_table(),
			source_chain: default_source_chain(),
			status_interval_secs: default_status_interval_secs(),
			recipient: RecipientPolicy::default(),
		}
	}
}

impl BridgeConfig {
	pub fn backend(&self) -> BackendConfig {
		BackendConfig {
			implementation: self.implementation.clone(),
			config: self.config.clone(),
		}
	}

	pub fn status_interval(&self) -> Duration {
		Duration::from_secs(self.status_interval_secs)
	}
}

/// Poll cadence tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
	#[serde(default = "default_base_interval_secs")]
	pub base_interval_secs: u64,
	#[serde(default = "default_step_ceiling")]
	pub step_ceiling: u32,
	/// Hard cap on any backoff interval.
	#[serde(default = "default_max_interval_secs")]
	pub max_interval_secs: u64,
	#[serde(default = "default_stale_interval_secs")]
	pub stale_interval_secs: u64,
	#[serde(default = "default_idle_interval_secs")]
	pub idle_interval_secs: u64,
	#[serde(default = "default_visible_multiplier")]
	pub visible_multiplier: u32,
	#[serde(default = "default_hidden_multiplier")]
	pub hidden_multiplier: u32,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			base_interval_secs: default_base_interval_secs(),
			step_ceiling: default_step_ceiling(),
			max_interval_secs: default_max_interval_secs(),
			stale_interval_secs: default_stale_interval_secs(),
			idle_interval_secs: default_idle_interval_secs(),
			visible_multiplier: default_visible_multiplier(),
			hidden_multiplier: default_hidden_multiplier(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
	/// `0x000…0` for the native currency.
	pub address: Address,
	pub decimals: u8,
}

/// One agent: its wallets, what they must hold and where its rewards are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
	pub id: String,
	pub home_chain: ChainId,
	pub master_eoa: Address,
	#[serde(default)]
	pub master_safe: Option<Address>,
	pub wallets: Vec<WalletTarget>,
	#[serde(default)]
	pub monthly_operating_estimate: BTreeMap<ChainId, Amount>,
	/// Rewards oracle per chain.
	#[serde(default)]
	pub rewards: BTreeMap<ChainId, BackendConfig>,
}

impl AgentConfig {
	pub fn targets(&self) -> TargetConfig {
		TargetConfig {
			wallets: self.wallets.clone(),
			monthly_operating_estimate: self.monthly_operating_estimate.clone(),
		}
	}
}

fn default_service_name() -> String {
	"funding-agent".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_http_port() -> u16 {
	8765
}

fn default_middleware_url() -> String {
	"http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
	30
}

fn default_max_retries() -> u32 {
	3
}

fn default_implementation() -> String {
	"http".to_string()
}

fn default_storage() -> BackendConfig {
	BackendConfig {
		implementation: "memory".to_string(),
		config: empty_table(),
	}
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::Table::new())
}

fn default_source_chain() -> ChainId {
	ChainId::ETHEREUM
}

fn default_status_interval_secs() -> u64 {
	5
}

fn default_base_interval_secs() -> u64 {
	15
}

fn default_step_ceiling() -> u32 {
	6
}

fn default_max_interval_secs() -> u64 {
	960
}

fn default_stale_interval_secs() -> u64 {
	30
}

fn default_idle_interval_secs() -> u64 {
	3600
}

fn default_visible_multiplier() -> u32 {
	3
}

fn default_hidden_multiplier() -> u32 {
	10
}
