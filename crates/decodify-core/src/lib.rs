//! Core orchestration for the decodify service.
//!
//! [`Decodify`] answers the two questions the API asks about a transaction:
//! which of its participants are plain accounts, and what it did. Each
//! configured chain gets a [`ChainServices`] bundle (inquirer, transaction
//! fetcher, address classifier, decoder) built once by [`DecodifyBuilder`] and
//! looked up through the [`ChainRegistry`].

use decodify_decoder::DecodeError;
use decodify_inquirer::InquirerError;
use decodify_storage::StorageError;
use decodify_types::{ChainId, TransactionHash};
use thiserror::Error;

pub mod builder;
pub mod engine;
pub mod handlers;

pub use builder::{BuilderError, DecodifyBuilder, DecodifyFactories};
pub use engine::registry::{ChainRegistry, ChainServices};
pub use engine::Decodify;
pub use handlers::accounts::{AccountRegistrar, RegistrationOutcome, RegistrationScope};

/// Errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum CoreError {
	/// The chain is known but not served by this instance.
	#[error("Chain {0} is not supported")]
	UnsupportedChain(ChainId),
	#[error("Transaction {0} not found")]
	TransactionNotFound(TransactionHash),
	/// A remote data source failed; retrying later may succeed.
	#[error("Failed to fetch chain data: {0}")]
	Fetch(#[from] InquirerError),
	#[error("Failed to classify addresses: {0}")]
	Classification(InquirerError),
	#[error("Failed to decode: {0}")]
	Decode(#[from] DecodeError),
	/// Related addresses could not be registered; nothing was fetched.
	#[error("Failed to register accounts: {0}")]
	Registration(StorageError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl CoreError {
	/// Whether the failure came from a remote data source.
	pub fn is_fetch_failure(&self) -> bool {
		matches!(self, CoreError::Fetch(_) | CoreError::Classification(_))
	}
}
