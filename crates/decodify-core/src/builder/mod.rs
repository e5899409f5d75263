//! Builds a [`Decodify`] instance from configuration.
//!
//! Besides wiring implementations chosen by name, building bootstraps the
//! store: RPC nodes and explorer credentials from configuration are written
//! to their tables, configured accounts are pinned, and each chain's
//! inquirer is then created from what the store holds.

use crate::engine::{registry::ChainRegistry, Decodify};
use crate::handlers::AccountRegistrar;
use crate::ChainServices;
use decodify_config::{ChainConfig, Config};
use decodify_decoder::DecoderFactory;
use decodify_inquirer::{ChainEndpoint, InquirerFactory, InquirerService};
use decodify_storage::{StorageError, StorageFactory, StorageService};
use decodify_types::{
	parse_address, ChainId, ExternalService, ExternalServiceCredential, RpcNode, SecretString,
	StorageKey,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Name of the RPC node seeded from a chain's `rpc_url`.
pub const DEFAULT_NODE_NAME: &str = "default";

#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Factory functions by implementation name.
pub struct DecodifyFactories {
	pub storage_factories: HashMap<String, StorageFactory>,
	pub inquirer_factories: HashMap<String, InquirerFactory>,
	pub decoder_factories: HashMap<String, DecoderFactory>,
}

pub struct DecodifyBuilder {
	config: Config,
}

impl DecodifyBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub async fn build(self, factories: DecodifyFactories) -> Result<Decodify, BuilderError> {
		let storage = Arc::new(self.build_storage(&factories)?);
		let registrar = AccountRegistrar::new(storage.clone());

		let mut chains: Vec<(&ChainId, &ChainConfig)> = self.config.chains.iter().collect();
		chains.sort_by_key(|(chain, _)| **chain);

		let mut services = Vec::with_capacity(chains.len());
		for (chain, chain_config) in chains {
			let chain = *chain;
			seed_rpc_nodes(&storage, chain, chain_config).await?;
			seed_credential(&storage, chain, chain_config).await?;

			let pinned = chain_config
				.tracked_accounts
				.iter()
				.map(|address| parse_address(address).map_err(BuilderError::Config))
				.collect::<Result<Vec<_>, _>>()?;
			registrar.pin(chain, &pinned).await?;

			let endpoint = load_endpoint(&storage, chain, chain_config).await?;
			services.push(build_chain(
				&factories,
				chain_config,
				&endpoint,
				storage.clone(),
			)?);
		}

		let registry = ChainRegistry::new(services);
		tracing::info!(chains = ?registry.chains(), "Built chain registry");
		Ok(Decodify::new(self.config, storage, registry))
	}

	fn build_storage(&self, factories: &DecodifyFactories) -> Result<StorageService, BuilderError> {
		let primary = &self.config.storage.primary;
		let factory = factories.storage_factories.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Unknown storage implementation '{}'", primary))
		})?;
		let config = self
			.config
			.storage
			.implementations
			.get(primary)
			.ok_or_else(|| {
				BuilderError::Config(format!("Primary storage '{}' is not configured", primary))
			})?;

		match factory(config) {
			Ok(backend) => {
				tracing::info!(component = "storage", implementation = %primary, "Loaded");
				Ok(StorageService::new(backend))
			},
			Err(e) => {
				tracing::error!(
					component = "storage",
					implementation = %primary,
					error = %e,
					"Failed to create storage implementation"
				);
				Err(BuilderError::Config(format!(
					"Failed to create storage implementation '{}': {}",
					primary, e
				)))
			},
		}
	}
}

/// Seeds the default node (kept if already stored) and writes configured
/// named nodes.
async fn seed_rpc_nodes(
	storage: &StorageService,
	chain: ChainId,
	config: &ChainConfig,
) -> Result<(), BuilderError> {
	if let Some(url) = &config.rpc_url {
		let node = RpcNode {
			name: DEFAULT_NODE_NAME.to_string(),
			endpoint: url.clone(),
			owned: false,
			active: true,
			weight: 1.0,
			chain,
		};
		if storage
			.insert_if_absent(StorageKey::RpcNodes, &node.storage_id(), &node)
			.await?
		{
			tracing::debug!(chain = %chain, "Seeded default RPC node");
		}
	}

	for node in &config.rpc_nodes {
		let node = RpcNode {
			name: node.name.clone(),
			endpoint: node.endpoint.clone(),
			owned: node.owned,
			active: node.active,
			weight: node.weight,
			chain,
		};
		storage
			.store(StorageKey::RpcNodes, &node.storage_id(), &node)
			.await?;
	}
	Ok(())
}

async fn seed_credential(
	storage: &StorageService,
	chain: ChainId,
	config: &ChainConfig,
) -> Result<(), BuilderError> {
	let Some(api_key) = config.api_key() else {
		return Ok(());
	};
	let service = ExternalService::explorer_for(chain);
	let credential = ExternalServiceCredential {
		service,
		api_key: SecretString::from(api_key),
	};
	storage
		.store(StorageKey::Credentials, service.as_str(), &credential)
		.await?;
	tracing::debug!(chain = %chain, service = service.as_str(), "Stored explorer credential");
	Ok(())
}

/// Reads back the chain's nodes and credential.
async fn load_endpoint(
	storage: &StorageService,
	chain: ChainId,
	config: &ChainConfig,
) -> Result<ChainEndpoint, BuilderError> {
	let names = config
		.rpc_url
		.iter()
		.map(|_| DEFAULT_NODE_NAME.to_string())
		.chain(config.rpc_nodes.iter().map(|node| node.name.clone()));

	let mut nodes = Vec::new();
	for name in names {
		let id = format!("{}:{}", chain, name);
		if let Some(node) = storage.find::<RpcNode>(StorageKey::RpcNodes, &id).await? {
			nodes.push(node);
		}
	}

	let api_key = storage
		.find::<ExternalServiceCredential>(
			StorageKey::Credentials,
			ExternalService::explorer_for(chain).as_str(),
		)
		.await?
		.map(|credential| credential.api_key);

	Ok(ChainEndpoint {
		chain,
		nodes,
		api_key,
	})
}

fn build_chain(
	factories: &DecodifyFactories,
	config: &ChainConfig,
	endpoint: &ChainEndpoint,
	storage: Arc<StorageService>,
) -> Result<ChainServices, BuilderError> {
	let chain = endpoint.chain;
	let primary = &config.inquirer.primary;
	let inquirer_factory = factories.inquirer_factories.get(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Unknown inquirer implementation '{}' for {}",
			primary, chain
		))
	})?;
	let inquirer_config = config.inquirer.implementations.get(primary).ok_or_else(|| {
		BuilderError::Config(format!("Inquirer '{}' is not configured for {}", primary, chain))
	})?;
	let inquirer = inquirer_factory(inquirer_config, endpoint).map_err(|e| {
		tracing::error!(component = "inquirer", chain = %chain, implementation = %primary, error = %e, "Failed to create inquirer");
		BuilderError::Config(format!("Failed to create inquirer for {}: {}", chain, e))
	})?;
	tracing::info!(component = "inquirer", chain = %chain, implementation = %primary, "Loaded");

	let decoder_name = &config.decoder.implementation;
	let decoder_factory = factories.decoder_factories.get(decoder_name).ok_or_else(|| {
		BuilderError::Config(format!(
			"Unknown decoder implementation '{}' for {}",
			decoder_name, chain
		))
	})?;
	let decoder_config = toml::Value::try_from(&config.decoder)
		.map_err(|e| BuilderError::Config(format!("Decoder options for {}: {}", chain, e)))?;
	let decoder = decoder_factory(&decoder_config, chain)
		.map_err(|e| BuilderError::Config(format!("Failed to create decoder for {}: {}", chain, e)))?;
	tracing::info!(component = "decoder", chain = %chain, implementation = %decoder_name, "Loaded");

	Ok(ChainServices::new(
		InquirerService::new(
			chain,
			inquirer,
			Duration::from_secs(config.request_timeout_seconds),
		),
		decoder,
		storage,
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_config::builders::config::ConfigBuilder;
	use decodify_types::{Address, TrackedAccount};

	fn factories() -> DecodifyFactories {
		DecodifyFactories {
			storage_factories: decodify_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			inquirer_factories: decodify_inquirer::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			decoder_factories: decodify_decoder::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	const PINNED: &str = "0x742d35Cc6634C0532925a3b8D42F3D4C38A5F7F1";

	fn config() -> Config {
		ConfigBuilder::new()
			.chain(
				ChainId::Optimism,
				"mock",
				toml::Value::Table(Default::default()),
			)
			.with_chain(ChainId::Optimism, |chain| {
				chain.rpc_url = Some("https://mainnet.optimism.io".to_string());
				chain.api_key = Some("op-key".to_string());
				chain.tracked_accounts = vec![PINNED.to_string()];
			})
			.build()
	}

	#[tokio::test]
	async fn test_bootstrap_seeds_tables() {
		let decodify = DecodifyBuilder::new(config()).build(factories()).await.unwrap();
		let storage = decodify.storage();

		let node: RpcNode = storage
			.retrieve(StorageKey::RpcNodes, "optimism:default")
			.await
			.unwrap();
		assert!(node.active);
		assert!(!node.owned);
		assert_eq!(node.weight, 1.0);

		let credential: ExternalServiceCredential = storage
			.retrieve(StorageKey::Credentials, "optimism_etherscan")
			.await
			.unwrap();
		assert_eq!(credential.api_key.expose_secret(), "op-key");

		let pinned: Address = PINNED.parse().unwrap();
		let account: TrackedAccount = storage
			.retrieve(
				StorageKey::Accounts,
				&TrackedAccount::storage_id(ChainId::Optimism, &pinned),
			)
			.await
			.unwrap();
		assert!(account.pinned);

		assert_eq!(decodify.registry().chains(), vec![ChainId::Optimism]);
	}

	#[tokio::test]
	async fn test_unknown_inquirer_rejected() {
		let config = ConfigBuilder::new()
			.chain(
				ChainId::Ethereum,
				"carrier-pigeon",
				toml::Value::Table(Default::default()),
			)
			.build();
		let result = DecodifyBuilder::new(config).build(factories()).await;
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}

	#[tokio::test]
	async fn test_rpc_inquirer_needs_a_node() {
		let config = ConfigBuilder::new()
			.chain(ChainId::Ethereum, "rpc", toml::Value::Table(Default::default()))
			.build();
		assert!(DecodifyBuilder::new(config).build(factories()).await.is_err());

		let config = ConfigBuilder::new()
			.chain(ChainId::Ethereum, "rpc", toml::Value::Table(Default::default()))
			.with_chain(ChainId::Ethereum, |chain| {
				chain.rpc_url = Some("http://localhost:8545".to_string());
			})
			.build();
		assert!(DecodifyBuilder::new(config).build(factories()).await.is_ok());
	}
}
