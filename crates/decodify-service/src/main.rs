//! Main entry point for the decodify service.
//!
//! Loads configuration, builds the per-chain decoding services and serves
//! the HTTP API until interrupted.

use clap::Parser;
use decodify_config::Config;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod cache;
mod factory_registry;
mod server;

/// Command-line arguments for the decodify service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/decodify.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

async fn load_config(path: &std::path::Path) -> Result<Config, Box<dyn std::error::Error>> {
	let path = path
		.to_str()
		.ok_or_else(|| format!("Configuration path is not valid UTF-8: {}", path.display()))?;
	Ok(Config::from_file(path).await?)
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!("Failed to listen for shutdown signal: {}", e);
		std::future::pending::<()>().await;
	}
	tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started decodify");

	let config = load_config(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let api_config = config.api.clone();
	let decodify = Arc::new(factory_registry::build_decodify_from_config(config).await?);
	let cleanup = decodify.start_cleanup();

	let result = server::start_server(api_config, decodify, shutdown_signal()).await;
	cleanup.abort();
	result?;

	tracing::info!("Stopped decodify");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_args_defaults() {
		let args = Args::parse_from(["decodify"]);
		assert_eq!(args.config, PathBuf::from("config/decodify.toml"));
		assert_eq!(args.log_level, "info");

		let args = Args::parse_from(["decodify", "-c", "other.toml", "--log-level", "debug"]);
		assert_eq!(args.config, PathBuf::from("other.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[tokio::test]
	async fn test_load_and_build_from_file() {
		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		write!(
			file,
			r#"
[service]
id = "decodify-test"

[storage]
primary = "memory"
cleanup_interval_seconds = 60

[storage.implementations.memory]

[chains.optimism]
tracked_accounts = ["0x742d35Cc6634C0532925a3b8D42F3D4C38A5F7F1"]

[chains.optimism.inquirer]
primary = "mock"

[chains.optimism.inquirer.implementations.mock]

[api]
port = 5001
"#
		)
		.unwrap();

		let config = tokio_test::assert_ok!(load_config(file.path()).await);
		assert_eq!(config.service.id, "decodify-test");
		assert_eq!(config.api.port, 5001);

		let decodify = factory_registry::build_decodify_from_config(config)
			.await
			.unwrap();
		assert!(decodify
			.registry()
			.is_supported(decodify_types::ChainId::Optimism));
	}

	#[tokio::test]
	async fn test_missing_config_file() {
		let result = load_config(std::path::Path::new("/nonexistent/decodify.toml")).await;
		assert!(result.is_err());
	}
}
