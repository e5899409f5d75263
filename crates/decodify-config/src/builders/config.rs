//! Builder for test and development configurations.

use crate::{
	ApiConfig, ChainConfig, Config, DecoderConfig, InquirerConfig, ServiceConfig, StorageConfig,
};
use decodify_types::ChainId;
use std::collections::HashMap;

/// Fluent builder for [`Config`], defaulting to memory storage and no chains.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	chains: HashMap<ChainId, ChainConfig>,
	api: ApiConfig,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);
		Self {
			storage_primary: "memory".to_string(),
			storage_implementations,
			chains: HashMap::new(),
			api: ApiConfig::default(),
		}
	}

	pub fn storage(mut self, primary: &str, config: toml::Value) -> Self {
		self.storage_primary = primary.to_string();
		self.storage_implementations
			.insert(primary.to_string(), config);
		self
	}

	/// Serves `chain` through the inquirer implementation `primary`.
	pub fn chain(mut self, chain: ChainId, primary: &str, inquirer_config: toml::Value) -> Self {
		let mut implementations = HashMap::new();
		implementations.insert(primary.to_string(), inquirer_config);
		self.chains.insert(
			chain,
			ChainConfig {
				inquirer: InquirerConfig {
					primary: primary.to_string(),
					implementations,
				},
				request_timeout_seconds: 5,
				rpc_url: None,
				rpc_nodes: Vec::new(),
				api_key: None,
				tracked_accounts: Vec::new(),
				decoder: DecoderConfig::default(),
			},
		);
		self
	}

	/// Adjusts an already added chain.
	pub fn with_chain<F: FnOnce(&mut ChainConfig)>(mut self, chain: ChainId, f: F) -> Self {
		if let Some(config) = self.chains.get_mut(&chain) {
			f(config);
		}
		self
	}

	pub fn api(mut self, api: ApiConfig) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig::default(),
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: 60,
			},
			chains: self.chains,
			api: self.api,
		}
	}
}
