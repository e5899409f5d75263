//! Chain registry.

use crate::handlers::{AddressClassifier, TransactionService};
use crate::CoreError;
use decodify_decoder::{DecoderInterface, DecoderService};
use decodify_inquirer::InquirerService;
use decodify_storage::StorageService;
use decodify_types::ChainId;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything needed to serve one chain.
pub struct ChainServices {
	chain: ChainId,
	transactions: TransactionService,
	classifier: AddressClassifier,
	decoder: DecoderService,
}

impl ChainServices {
	pub fn new(
		inquirer: InquirerService,
		decoder: Box<dyn DecoderInterface>,
		storage: Arc<StorageService>,
	) -> Self {
		let chain = inquirer.chain();
		let inquirer = Arc::new(inquirer);
		Self {
			chain,
			transactions: TransactionService::new(inquirer.clone(), storage.clone()),
			classifier: AddressClassifier::new(inquirer),
			decoder: DecoderService::new(chain, decoder, storage),
		}
	}

	pub fn chain(&self) -> ChainId {
		self.chain
	}

	pub fn transactions(&self) -> &TransactionService {
		&self.transactions
	}

	pub fn classifier(&self) -> &AddressClassifier {
		&self.classifier
	}

	pub fn decoder(&self) -> &DecoderService {
		&self.decoder
	}
}

/// Maps each served chain to its services. Built once at startup.
#[derive(Default)]
pub struct ChainRegistry {
	chains: HashMap<ChainId, Arc<ChainServices>>,
}

impl ChainRegistry {
	pub fn new(services: impl IntoIterator<Item = ChainServices>) -> Self {
		Self {
			chains: services
				.into_iter()
				.map(|services| (services.chain(), Arc::new(services)))
				.collect(),
		}
	}

	/// Fails with [`CoreError::UnsupportedChain`] for chains not served here.
	pub fn resolve(&self, chain: ChainId) -> Result<Arc<ChainServices>, CoreError> {
		self.chains
			.get(&chain)
			.cloned()
			.ok_or(CoreError::UnsupportedChain(chain))
	}

	pub fn is_supported(&self, chain: ChainId) -> bool {
		self.chains.contains_key(&chain)
	}

	/// Served chains in a stable order.
	pub fn chains(&self) -> Vec<ChainId> {
		let mut chains: Vec<ChainId> = self.chains.keys().copied().collect();
		chains.sort();
		chains
	}
}
