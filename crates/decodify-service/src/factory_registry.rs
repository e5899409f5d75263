//! Registry of every implementation factory compiled into the binary.
//!
//! Configuration selects implementations by name; this module maps those
//! names to factories and hands the ones in use to the builder.

use decodify_config::Config;
use decodify_core::{Decodify, DecodifyBuilder, DecodifyFactories};
use decodify_decoder::DecoderFactory;
use decodify_inquirer::InquirerFactory;
use decodify_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub inquirer: HashMap<String, InquirerFactory>,
	pub decoder: HashMap<String, DecoderFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			inquirer: HashMap::new(),
			decoder: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_inquirer(&mut self, name: impl Into<String>, factory: InquirerFactory) {
		self.inquirer.insert(name.into(), factory);
	}

	pub fn register_decoder(&mut self, name: impl Into<String>, factory: DecoderFactory) {
		self.decoder.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, filling it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in decodify_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in decodify_inquirer::get_all_implementations() {
			tracing::debug!("Registering inquirer implementation: {}", name);
			registry.register_inquirer(name, factory);
		}

		for (name, factory) in decodify_decoder::get_all_implementations() {
			tracing::debug!("Registering decoder implementation: {}", name);
			registry.register_decoder(name, factory);
		}

		registry
	})
}

/// Picks the factories for `names` out of `available`.
fn select<'a, F: Copy>(
	available: &HashMap<String, F>,
	names: impl IntoIterator<Item = &'a String>,
	kind: &str,
) -> Result<HashMap<String, F>, String> {
	let mut selected = HashMap::new();
	for name in names {
		match available.get(name) {
			Some(factory) => {
				selected.insert(name.clone(), *factory);
			},
			None => {
				let mut known: Vec<&str> = available.keys().map(String::as_str).collect();
				known.sort_unstable();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					kind,
					name,
					known.join(", ")
				));
			},
		}
	}
	Ok(selected)
}

/// Resolves the factories named by `config`.
pub fn factories_for(
	registry: &FactoryRegistry,
	config: &Config,
) -> Result<DecodifyFactories, String> {
	let storage_factories = select(
		&registry.storage,
		std::iter::once(&config.storage.primary),
		"storage",
	)?;
	let inquirer_factories = select(
		&registry.inquirer,
		config
			.chains
			.values()
			.map(|chain| &chain.inquirer.primary),
		"inquirer",
	)?;
	let decoder_factories = select(
		&registry.decoder,
		config
			.chains
			.values()
			.map(|chain| &chain.decoder.implementation),
		"decoder",
	)?;

	Ok(DecodifyFactories {
		storage_factories,
		inquirer_factories,
		decoder_factories,
	})
}

/// Builds decodify using the global registry.
pub async fn build_decodify_from_config(
	config: Config,
) -> Result<Decodify, Box<dyn std::error::Error>> {
	let factories = factories_for(get_registry(), &config)?;
	Ok(DecodifyBuilder::new(config).build(factories).await?)
}
