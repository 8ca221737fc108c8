//! Funding sessions and the engine that drives them.

use funding_balances::{BalanceInterface, BalanceService, RewardsInterface, RewardsRegistry};
use funding_bridge::BridgeInterface;
use funding_config::Config;
use funding_planner::TokenTable;
use funding_scheduler::PollPolicy;
use funding_storage::{StorageInterface, StorageService};
use funding_types::{ChainId, EventBus};
use std::collections::HashMap;
use std::sync::Arc;

pub mod engine;
pub mod session;
pub mod store;

pub use engine::{Assessment, EngineError, FundingEngine, FundingOutcome};
pub use session::{FundingSession, Presence, SessionError, SessionRecord, SessionView};
pub use store::SessionStore;

type StorageFactory = Box<dyn Fn(&toml::Value) -> Box<dyn StorageInterface> + Send>;
type BalanceFactory = Box<dyn Fn(&toml::Value) -> Box<dyn BalanceInterface> + Send>;
type BridgeFactory = Box<dyn Fn(&toml::Value) -> Box<dyn BridgeInterface> + Send>;
type RewardsFactory = Box<dyn Fn(ChainId, &toml::Value) -> Box<dyn RewardsInterface> + Send>;

/// Assembles a [`FundingEngine`] from configuration and named implementation factories.
pub struct FundingBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	balance_factories: HashMap<String, BalanceFactory>,
	bridge_factories: HashMap<String, BridgeFactory>,
	rewards_factories: HashMap<String, RewardsFactory>,
}

impl FundingBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			balance_factories: HashMap::new(),
			bridge_factories: HashMap::new(),
			rewards_factories: HashMap::new(),
		}
	}

	pub fn with_storage_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Box<dyn StorageInterface> + Send + 'static,
	{
		self.storage_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_balance_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Box<dyn BalanceInterface> + Send + 'static,
	{
		self.balance_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_bridge_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Box<dyn BridgeInterface> + Send + 'static,
	{
		self.bridge_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_rewards_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(ChainId, &toml::Value) -> Box<dyn RewardsInterface> + Send + 'static,
	{
		self.rewards_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	/// Creates every configured implementation and validates its table.
	pub fn build(self) -> Result<FundingEngine, EngineError> {
		let config = self.config;

		// Storage
		let storage_config = &config.storage;
		let factory = self
			.storage_factories
			.get(&storage_config.implementation)
			.ok_or_else(|| unknown("storage", &storage_config.implementation))?;
		let backend = factory(&storage_config.config);
		backend
			.config_schema()
			.validate(&storage_config.config)
			.map_err(|e| EngineError::Config(format!("storage: {}", e)))?;
		let store = SessionStore::new(Arc::new(StorageService::new(backend)));

		// Balance source
		let table = config.backend_table(&config.balances);
		let factory = self
			.balance_factories
			.get(&config.balances.implementation)
			.ok_or_else(|| unknown("balance source", &config.balances.implementation))?;
		let source = factory(&table);
		source
			.config_schema()
			.validate(&table)
			.map_err(|e| EngineError::Config(format!("balances: {}", e)))?;
		let balances = BalanceService::new(source);

		// Quote provider
		let table = config.backend_table(&config.bridge.backend());
		let factory = self
			.bridge_factories
			.get(&config.bridge.implementation)
			.ok_or_else(|| unknown("quote provider", &config.bridge.implementation))?;
		let provider = factory(&table);
		provider
			.config_schema()
			.validate(&table)
			.map_err(|e| EngineError::Config(format!("bridge: {}", e)))?;
		let bridge: Arc<dyn BridgeInterface> = Arc::from(provider);

		// Rewards oracles, per agent and chain
		let mut rewards = HashMap::new();
		for agent in &config.agents {
			let mut registry = RewardsRegistry::new();
			for (chain, backend) in &agent.rewards {
				let table = config.backend_table(backend);
				let factory = self
					.rewards_factories
					.get(&backend.implementation)
					.ok_or_else(|| unknown("rewards oracle", &backend.implementation))?;
				let oracle = factory(*chain, &table);
				oracle.config_schema().validate(&table).map_err(|e| {
					EngineError::Config(format!("agent '{}' rewards on {}: {}", agent.id, chain, e))
				})?;
				registry.register(*chain, oracle);
			}
			if !registry.is_empty() {
				rewards.insert(agent.id.clone(), registry);
			}
		}

		let mut routes = TokenTable::new();
		for (chain, tokens) in &config.tokens {
			for (symbol, token) in tokens {
				routes.insert(*chain, symbol, token.address, token.decimals);
			}
		}

		let policy = PollPolicy::from(&config.scheduler);

		Ok(FundingEngine::new(
			config,
			balances,
			rewards,
			bridge,
			routes,
			store,
			policy,
			EventBus::new(1000),
		))
	}
}

fn unknown(kind: &str, name: &str) -> EngineError {
	EngineError::Config(format!("No {} implementation named '{}'", kind, name))
}
