//! Transaction decoding for the decodify service.
//!
//! A decoder turns a mined transaction and its receipt into the ordered list
//! of economic events seen from the tracked accounts. Rule sets are selected
//! per chain by name; [`DecoderService`] feeds them from the store and caches
//! what they produce.

use decodify_storage::{StorageError, StorageService};
use decodify_types::{
	Address, ChainId, ConfigSchema, DecodedEvent, ImplementationRegistry, RawTransaction,
	StorageKey, TrackedAccount, TransactionHash, TransactionReceipt,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod evm;
}

/// Errors that can occur while decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("Malformed log {log_index}: {reason}")]
	MalformedLog { log_index: u64, reason: String },
	#[error("Missing {0} for decoding")]
	MissingData(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// A chain's rule set.
pub trait DecoderInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Addresses whose tracked status affects the output, beyond the
	/// transaction participants.
	fn involved_addresses(&self, receipt: &TransactionReceipt) -> Vec<Address>;

	/// Decodes one transaction. `tracked` holds the involved addresses that
	/// are tracked accounts. Events come out with their final sequence index.
	fn decode(
		&self,
		transaction: &RawTransaction,
		receipt: &TransactionReceipt,
		tracked: &BTreeSet<Address>,
	) -> Result<Vec<DecodedEvent>, DecodeError>;
}

/// Factory function type every decoder implementation provides.
pub type DecoderFactory = fn(&toml::Value, ChainId) -> Result<Box<dyn DecoderInterface>, DecodeError>;

pub trait DecoderRegistry: ImplementationRegistry<Factory = DecoderFactory> {}

/// All decoder implementations, as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, DecoderFactory)> {
	use implementations::evm;

	vec![(evm::Registry::NAME, evm::Registry::factory())]
}

/// Decodes stored transactions of one chain and caches the result.
pub struct DecoderService {
	chain: ChainId,
	implementation: Box<dyn DecoderInterface>,
	storage: Arc<StorageService>,
}

impl DecoderService {
	pub fn new(
		chain: ChainId,
		implementation: Box<dyn DecoderInterface>,
		storage: Arc<StorageService>,
	) -> Self {
		Self {
			chain,
			implementation,
			storage,
		}
	}

	pub fn chain(&self) -> ChainId {
		self.chain
	}

	/// Decodes each hash in order and concatenates the events.
	///
	/// The transaction and receipt must already be stored. Unless
	/// `ignore_cache` is set, a previously decoded result is returned as is.
	pub async fn decode_transaction_hashes(
		&self,
		hashes: &[TransactionHash],
		ignore_cache: bool,
	) -> Result<Vec<DecodedEvent>, DecodeError> {
		let mut events = Vec::new();
		for hash in hashes {
			events.extend(self.decode_one(hash, ignore_cache).await?);
		}
		Ok(events)
	}

	async fn decode_one(
		&self,
		hash: &TransactionHash,
		ignore_cache: bool,
	) -> Result<Vec<DecodedEvent>, DecodeError> {
		let id = format!("{}:{}", self.chain, hash);

		if !ignore_cache {
			if let Some(cached) = self
				.storage
				.find::<Vec<DecodedEvent>>(StorageKey::DecodedEvents, &id)
				.await?
			{
				tracing::debug!(chain = %self.chain, tx_hash = %hash, "Decoded events served from cache");
				return Ok(cached);
			}
		}

		let transaction: RawTransaction = self
			.storage
			.find(StorageKey::Transactions, &id)
			.await?
			.ok_or_else(|| DecodeError::MissingData(format!("transaction {}", hash)))?;
		let receipt: TransactionReceipt = self
			.storage
			.find(StorageKey::Receipts, &id)
			.await?
			.ok_or_else(|| DecodeError::MissingData(format!("receipt {}", hash)))?;

		let tracked = self.tracked_subset(&transaction, &receipt).await?;
		let events = self.implementation.decode(&transaction, &receipt, &tracked)?;

		self.storage
			.store(StorageKey::DecodedEvents, &id, &events)
			.await?;
		tracing::info!(
			chain = %self.chain,
			tx_hash = %hash,
			events = events.len(),
			tracked = tracked.len(),
			"Decoded transaction"
		);
		Ok(events)
	}

	async fn tracked_subset(
		&self,
		transaction: &RawTransaction,
		receipt: &TransactionReceipt,
	) -> Result<BTreeSet<Address>, DecodeError> {
		let candidates: BTreeSet<Address> = transaction
			.participants()
			.chain(self.implementation.involved_addresses(receipt))
			.collect();

		let mut tracked = BTreeSet::new();
		for address in candidates {
			let id = TrackedAccount::storage_id(self.chain, &address);
			if self.storage.exists(StorageKey::Accounts, &id).await? {
				tracked.insert(address);
			}
		}
		Ok(tracked)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_storage::implementations::memory::MemoryStorage;
	use decodify_types::{EventSubtype, EventType, B256, U256};

	const HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

	fn sender() -> Address {
		Address::repeat_byte(0x11)
	}

	fn fixtures() -> (RawTransaction, TransactionReceipt) {
		let hash: TransactionHash = HASH.parse().unwrap();
		let transaction = RawTransaction {
			chain: ChainId::Ethereum,
			hash,
			from: sender(),
			to: Some(Address::repeat_byte(0x22)),
			value: U256::from(5u64),
			input: Default::default(),
			gas: 21_000,
			gas_price: 10,
			nonce: 0,
			block_number: Some(1),
		};
		let receipt = TransactionReceipt {
			chain: ChainId::Ethereum,
			tx_hash: hash,
			block_number: 1,
			success: true,
			gas_used: 21_000,
			effective_gas_price: 10,
			contract_address: None,
			logs: vec![],
		};
		(transaction, receipt)
	}

	async fn service_with_fixtures() -> (DecoderService, Arc<StorageService>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let (transaction, receipt) = fixtures();
		let id = format!("ethereum:{}", HASH);
		storage
			.store(StorageKey::Transactions, &id, &transaction)
			.await
			.unwrap();
		storage.store(StorageKey::Receipts, &id, &receipt).await.unwrap();

		let decoder = implementations::evm::create_decoder(
			&toml::Value::Table(Default::default()),
			ChainId::Ethereum,
		)
		.unwrap();
		(
			DecoderService::new(ChainId::Ethereum, decoder, storage.clone()),
			storage,
		)
	}

	async fn track(storage: &StorageService, address: Address) {
		let account = TrackedAccount {
			chain: ChainId::Ethereum,
			address,
			pinned: true,
			scoped_holds: 0,
		};
		storage
			.store(
				StorageKey::Accounts,
				&TrackedAccount::storage_id(ChainId::Ethereum, &address),
				&account,
			)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_tracked_sender_gets_fee_and_spend() {
		let (service, storage) = service_with_fixtures().await;
		track(&storage, sender()).await;

		let hash: TransactionHash = HASH.parse().unwrap();
		let events = service.decode_transaction_hashes(&[hash], false).await.unwrap();
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].event_subtype, EventSubtype::Fee);
		assert_eq!(events[0].amount, U256::from(210_000u64));
		assert_eq!(events[1].event_type, EventType::Spend);
		assert_eq!(events[1].sequence_index, 1);
	}

	#[tokio::test]
	async fn test_cache_reused_unless_ignored() {
		let (service, storage) = service_with_fixtures().await;
		let hash: TransactionHash = HASH.parse().unwrap();

		let untracked = service.decode_transaction_hashes(&[hash], false).await.unwrap();
		assert_eq!(untracked.len(), 1);
		assert_eq!(untracked[0].event_type, EventType::Informational);

		track(&storage, sender()).await;
		let cached = service.decode_transaction_hashes(&[hash], false).await.unwrap();
		assert_eq!(cached, untracked);

		let fresh = service.decode_transaction_hashes(&[hash], true).await.unwrap();
		assert_eq!(fresh.len(), 2);
	}

	#[tokio::test]
	async fn test_missing_receipt() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let decoder = implementations::evm::create_decoder(
			&toml::Value::Table(Default::default()),
			ChainId::Ethereum,
		)
		.unwrap();
		let service = DecoderService::new(ChainId::Ethereum, decoder, storage);

		let hash = TransactionHash(B256::repeat_byte(0xab));
		let result = service.decode_transaction_hashes(&[hash], false).await;
		assert!(matches!(result, Err(DecodeError::MissingData(_))));
	}
}
