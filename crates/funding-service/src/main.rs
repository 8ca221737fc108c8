use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use funding_balances::implementations::{balances, rewards};
use funding_bridge::implementations::http as bridge_http;
use funding_config::{Config, ConfigLoader};
use funding_core::{FundingBuilder, FundingEngine};
use funding_storage::implementations::{file, memory};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Parser)]
#[command(name = "funding-agent")]
#[command(about = "Agent funding reconciliation and cross-chain bridging", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/funding.toml")]
	config: PathBuf,

	#[arg(long, env = "FUNDING_LOG_LEVEL", default_value = "info")]
	log_level: String,

	#[arg(long, value_enum, default_value_t = LogFormat::Text)]
	log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the funding service
	Start,
	/// Validate the configuration file
	Validate,
	/// Compute one agent's requirements and print the bridge plan
	Plan {
		/// Agent id from the configuration
		agent: String,
	},
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
	Text,
	Json,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level, cli.log_format)?;

	match &cli.command {
		Some(Commands::Start) | None => start_service(&cli).await,
		Some(Commands::Validate) => validate_config(&cli).await,
		Some(Commands::Plan { agent }) => print_plan(&cli, agent).await,
	}
}

/// Registers every implementation shipped with the service.
fn engine_builder(config: Config) -> FundingBuilder {
	FundingBuilder::new(config)
		.with_storage_factory("memory", memory::create_storage)
		.with_storage_factory("file", file::create_storage)
		.with_balance_factory("http", balances::http::create_balance_source)
		.with_bridge_factory("http", bridge_http::create_provider)
		.with_rewards_factory("http", rewards::http::create_oracle)
		.with_rewards_factory("fixed", rewards::fixed::create_oracle)
}

async fn load_config(cli: &Cli) -> Result<Config> {
	info!("Loading configuration from: {:?}", cli.config);
	ConfigLoader::new()
		.with_file(&cli.config)
		.with_env_prefix("FUNDING_")
		.load()
		.await
		.context("Failed to load configuration")
}

async fn start_service(cli: &Cli) -> Result<()> {
	info!("Starting funding agent");

	let config = load_config(cli).await?;
	info!("Service name: {}", config.service.name);
	info!("HTTP port: {}", config.service.http_port);
	info!("Agents: {}", config.agents.len());

	let port = config.service.http_port;
	let engine = Arc::new(
		engine_builder(config)
			.build()
			.context("Failed to build funding engine")?,
	);

	let http_handle = tokio::spawn({
		let engine = engine.clone();
		async move { api::start_http_server(engine, port).await }
	});

	info!("Funding agent started");

	setup_shutdown_signal().await;

	info!("Shutdown signal received, closing sessions...");
	close_sessions(&engine).await;
	http_handle.abort();

	info!("Funding agent stopped");
	Ok(())
}

async fn close_sessions(engine: &FundingEngine) {
	for session in engine.sessions() {
		if let Err(e) = engine.close_session(session.id()).await {
			tracing::warn!(session_id = %session.id(), "Failed to close session: {}", e);
		}
	}
}

async fn validate_config(cli: &Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = load_config(cli).await?;
	let summary: Vec<String> = config
		.agents
		.iter()
		.map(|agent| format!("{} ({} wallets)", agent.id, agent.wallets.len()))
		.collect();
	let balances = config.balances.implementation.clone();
	let bridge = config.bridge.implementation.clone();
	let storage = config.storage.implementation.clone();

	// Building the engine validates every implementation table.
	engine_builder(config)
		.build()
		.context("Invalid implementation configuration")?;

	info!("Configuration is valid");
	info!("  Balances: {}", balances);
	info!("  Bridge: {}", bridge);
	info!("  Storage: {}", storage);
	for agent in summary {
		info!("  Agent: {}", agent);
	}
	Ok(())
}

async fn print_plan(cli: &Cli, agent: &str) -> Result<()> {
	let config = load_config(cli).await?;
	let engine = engine_builder(config)
		.build()
		.context("Failed to build funding engine")?;

	let (assessment, requests) = engine
		.preview(agent)
		.await
		.with_context(|| format!("Failed to plan funding for agent '{}'", agent))?;

	let output = serde_json::json!({
		"agent": agent,
		"assessment": assessment,
		"bridge_requests": requests,
	});
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}

fn setup_tracing(log_level: &str, format: LogFormat) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	let registry = tracing_subscriber::registry().with(env_filter);
	match format {
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
	}

	Ok(())
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
