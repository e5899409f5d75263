//! Configuration module for the decodify service.
//!
//! Configuration is loaded from TOML. `${VAR}` and `${VAR:-default}` are
//! resolved from the environment before parsing, and a file may pull in
//! others with `include = ["chains.toml", ...]`. Each top-level section
//! must be defined in exactly one file.

mod loader;

#[cfg(any(test, feature = "testing"))]
pub mod builders {
	pub mod config;
}

use decodify_types::{parse_address, ChainId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the default rendering dumps the input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	#[serde(default)]
	pub service: ServiceConfig,
	pub storage: StorageConfig,
	/// Served chains, keyed by chain name.
	pub chains: HashMap<ChainId, ChainConfig>,
	#[serde(default)]
	pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Instance name, used in logs.
	#[serde(default = "default_service_id")]
	pub id: String,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			id: default_service_id(),
		}
	}
}

fn default_service_id() -> String {
	"decodify".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Implementation name to its raw configuration table.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval between expired-entry sweeps.
	pub cleanup_interval_seconds: u64,
}

/// Per-chain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	pub inquirer: InquirerConfig,
	/// Upper bound for a single remote call.
	#[serde(default = "default_request_timeout")]
	pub request_timeout_seconds: u64,
	/// Endpoint of the default RPC node seeded for this chain.
	pub rpc_url: Option<String>,
	/// Additional RPC nodes.
	#[serde(default)]
	pub rpc_nodes: Vec<RpcNodeConfig>,
	/// Explorer API key. Empty strings count as absent.
	pub api_key: Option<String>,
	/// Addresses tracked permanently on this chain.
	#[serde(default)]
	pub tracked_accounts: Vec<String>,
	#[serde(default)]
	pub decoder: DecoderConfig,
}

impl ChainConfig {
	pub fn api_key(&self) -> Option<&str> {
		self.api_key.as_deref().filter(|key| !key.trim().is_empty())
	}
}

fn default_request_timeout() -> u64 {
	10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InquirerConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcNodeConfig {
	pub name: String,
	pub endpoint: String,
	#[serde(default)]
	pub owned: bool,
	#[serde(default = "default_true")]
	pub active: bool,
	#[serde(default = "default_weight")]
	pub weight: f64,
}

fn default_true() -> bool {
	true
}

fn default_weight() -> f64 {
	1.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecoderConfig {
	/// Rule set to decode with.
	#[serde(default = "default_decoder")]
	pub implementation: String,
	/// Wrapped native token whose `Deposit`/`Withdrawal` logs are decoded.
	/// Defaults to the chain's canonical wrapper.
	pub wrapped_native_token: Option<String>,
}

impl Default for DecoderConfig {
	fn default() -> Self {
		Self {
			implementation: default_decoder(),
			wrapped_native_token: None,
		}
	}
}

fn default_decoder() -> String {
	"evm".to_string()
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Deadline for one request, covering every remote call it makes.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Lifetime of cached successful responses. 0 disables the cache.
	#[serde(default = "default_cache_ttl")]
	pub cache_ttl_seconds: u64,
	#[serde(default = "default_max_related_addresses")]
	pub max_related_addresses: usize,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			host: default_api_host(),
			port: default_api_port(),
			timeout_seconds: default_api_timeout(),
			cache_ttl_seconds: default_cache_ttl(),
			max_related_addresses: default_max_related_addresses(),
		}
	}
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	5000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_cache_ttl() -> u64 {
	300
}

fn default_max_related_addresses() -> usize {
	2
}

/// Replaces `${VAR}` and `${VAR:-default}` with environment values.
///
/// Input is capped at 1 MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut missing = None;
	let resolved = re.replace_all(input, |caps: &regex::Captures<'_>| {
		let var_name = &caps[1];
		match (std::env::var(var_name), caps.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				missing.get_or_insert_with(|| var_name.to_string());
				String::new()
			},
		}
	});

	match missing {
		Some(var_name) => Err(ConfigError::Validation(format!(
			"Environment variable '{}' not found",
			var_name
		))),
		None => Ok(resolved.into_owned()),
	}
}

impl Config {
	/// Loads configuration from `path`, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		self.validate_storage()?;

		if self.chains.is_empty() {
			return Err(ConfigError::Validation(
				"At least one chain must be configured".into(),
			));
		}
		for (chain, chain_config) in &self.chains {
			validate_chain(*chain, chain_config)?;
		}

		if self.api.timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"api.timeout_seconds must be greater than 0".into(),
			));
		}
		if self.api.max_related_addresses == 0 {
			return Err(ConfigError::Validation(
				"api.max_related_addresses must be at least 1".into(),
			));
		}

		Ok(())
	}

	fn validate_storage(&self) -> Result<(), ConfigError> {
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be greater than 0".into(),
			));
		}
		if self.storage.cleanup_interval_seconds > 86400 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}
		Ok(())
	}
}

fn validate_chain(chain: ChainId, config: &ChainConfig) -> Result<(), ConfigError> {
	let invalid = |message: String| ConfigError::Validation(format!("chains.{}: {}", chain, message));

	if !config
		.inquirer
		.implementations
		.contains_key(&config.inquirer.primary)
	{
		return Err(invalid(format!(
			"primary inquirer '{}' not found in implementations",
			config.inquirer.primary
		)));
	}
	if config.request_timeout_seconds == 0 {
		return Err(invalid("request_timeout_seconds must be greater than 0".into()));
	}

	let mut names = std::collections::HashSet::new();
	for node in &config.rpc_nodes {
		if node.name == "default" {
			return Err(invalid("rpc node name 'default' is reserved".into()));
		}
		if !names.insert(node.name.as_str()) {
			return Err(invalid(format!("duplicate rpc node '{}'", node.name)));
		}
		if !(node.weight.is_finite() && (0.0..=1.0).contains(&node.weight)) {
			return Err(invalid(format!(
				"rpc node '{}' weight must be between 0 and 1",
				node.name
			)));
		}
	}

	for address in config
		.tracked_accounts
		.iter()
		.chain(config.decoder.wrapped_native_token.iter())
	{
		parse_address(address).map_err(&invalid)?;
	}

	Ok(())
}

/// Parses a TOML string, resolving environment variables, then validates.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
