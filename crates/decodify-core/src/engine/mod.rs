//! The decode orchestrator.

pub mod registry;

use crate::handlers::AccountRegistrar;
use crate::CoreError;
use decodify_config::Config;
use decodify_storage::StorageService;
use decodify_types::{truncate_id, Address, ChainId, DecodedEvent, TransactionHash};
use registry::ChainRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::instrument;

/// Multi-chain transaction decoding orchestrator.
pub struct Decodify {
	config: Config,
	storage: Arc<StorageService>,
	registry: ChainRegistry,
	registrar: AccountRegistrar,
}

impl Decodify {
	pub fn new(config: Config, storage: Arc<StorageService>, registry: ChainRegistry) -> Self {
		Self {
			config,
			registrar: AccountRegistrar::new(storage.clone()),
			storage,
			registry,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn registry(&self) -> &ChainRegistry {
		&self.registry
	}

	pub fn registrar(&self) -> &AccountRegistrar {
		&self.registrar
	}

	/// Non-contract participants of a transaction.
	///
	/// An unknown transaction yields an empty list. Nothing is persisted.
	#[instrument(skip_all, fields(chain = %chain, tx_hash = %truncate_id(&tx_hash.to_string())))]
	pub async fn resolve_participants(
		&self,
		chain: ChainId,
		tx_hash: &TransactionHash,
		deadline: Option<Instant>,
	) -> Result<Vec<Address>, CoreError> {
		let services = self.registry.resolve(chain)?;
		let Some(transaction) = services.transactions().fetch(tx_hash, deadline).await? else {
			tracing::debug!("Transaction unknown, no participants");
			return Ok(Vec::new());
		};
		services
			.classifier()
			.classify_non_contract_participants(&transaction, deadline)
			.await
	}

	/// Decoded events of a transaction, in decoder order.
	///
	/// `related_addresses` count as tracked for the duration of the call and
	/// are released on every exit path.
	#[instrument(skip_all, fields(chain = %chain, tx_hash = %truncate_id(&tx_hash.to_string()), related = related_addresses.len()))]
	pub async fn decode(
		&self,
		chain: ChainId,
		tx_hash: &TransactionHash,
		related_addresses: &[Address],
		deadline: Option<Instant>,
	) -> Result<Vec<DecodedEvent>, CoreError> {
		let services = self.registry.resolve(chain)?;
		let events = self
			.registrar
			.with_accounts(chain, related_addresses, || async {
				services.transactions().ensure_receipt(tx_hash, deadline).await?;
				let events = services
					.decoder()
					.decode_transaction_hashes(std::slice::from_ref(tx_hash), false)
					.await?;
				Ok::<_, CoreError>(events)
			})
			.await?;
		tracing::info!(events = events.len(), "Decoded transaction");
		Ok(events)
	}

	/// Spawns the periodic sweep of expired storage entries.
	pub fn start_cleanup(&self) -> JoinHandle<()> {
		let storage = self.storage.clone();
		let period = Duration::from_secs(self.config.storage.cleanup_interval_seconds);
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			// The first tick completes immediately.
			interval.tick().await;
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(0) => {},
					Ok(removed) => tracing::debug!(removed, "Removed expired storage entries"),
					Err(e) => tracing::warn!(error = %e, "Storage cleanup failed"),
				}
			}
		})
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::ChainServices;
	use decodify_config::builders::config::ConfigBuilder;
	use decodify_decoder::implementations::evm::create_decoder;
	use decodify_inquirer::implementations::mock::MockInquirer;
	use decodify_inquirer::{InquirerError, InquirerService};
	use decodify_storage::implementations::memory::MemoryStorage;
	use decodify_types::{
		EventSubtype, EventType, RawTransaction, ReceiptLog, StorageKey, TrackedAccount,
		TransactionReceipt, B256, U256,
	};

	const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
	const APPROVAL: &str = "0x8c5be1e5ebec7d5bd14b71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

	pub(crate) fn eoa() -> Address {
		Address::repeat_byte(0xa1)
	}

	pub(crate) fn token() -> Address {
		Address::repeat_byte(0xc0)
	}

	pub(crate) fn recipient() -> Address {
		Address::repeat_byte(0xb2)
	}

	pub(crate) fn hash() -> TransactionHash {
		TransactionHash(B256::repeat_byte(0x42))
	}

	fn word(value: u64) -> decodify_types::Bytes {
		decodify_types::Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec())
	}

	/// A token transfer from `eoa` followed by an approval, sent to `token`.
	pub(crate) fn token_transfer_fixture(chain: ChainId) -> MockInquirer {
		let transaction = RawTransaction {
			chain,
			hash: hash(),
			from: eoa(),
			to: Some(token()),
			value: U256::ZERO,
			input: Default::default(),
			gas: 80_000,
			gas_price: 2,
			nonce: 3,
			block_number: Some(10),
		};
		let receipt = TransactionReceipt {
			chain,
			tx_hash: hash(),
			block_number: 10,
			success: true,
			gas_used: 50_000,
			effective_gas_price: 2,
			contract_address: None,
			logs: vec![
				ReceiptLog {
					log_index: 1,
					address: token(),
					topics: vec![
						TRANSFER.parse().unwrap(),
						eoa().into_word(),
						recipient().into_word(),
					],
					data: word(1_000),
				},
				ReceiptLog {
					log_index: 2,
					address: token(),
					topics: vec![
						APPROVAL.parse().unwrap(),
						eoa().into_word(),
						recipient().into_word(),
					],
					data: word(0),
				},
			],
		};
		MockInquirer::new(chain)
			.with_transaction(transaction)
			.with_receipt(receipt)
			.with_contract(token())
	}

	pub(crate) fn decodify_with(mock: MockInquirer) -> Decodify {
		let chain = ChainId::Ethereum;
		let config = ConfigBuilder::new()
			.chain(chain, "mock", toml::Value::Table(Default::default()))
			.build();
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let decoder = create_decoder(&toml::Value::Table(Default::default()), chain).unwrap();
		let services = ChainServices::new(
			InquirerService::new(chain, Box::new(mock), Duration::from_secs(5)),
			decoder,
			storage.clone(),
		);
		Decodify::new(config, storage, ChainRegistry::new([services]))
	}

	#[tokio::test]
	async fn test_unsupported_chain_writes_nothing() {
		let decodify = decodify_with(MockInquirer::new(ChainId::Ethereum));
		let result = decodify
			.decode(ChainId::Optimism, &hash(), &[eoa()], None)
			.await;
		assert!(matches!(result, Err(CoreError::UnsupportedChain(ChainId::Optimism))));
		assert!(!decodify
			.storage()
			.exists(
				StorageKey::Accounts,
				&TrackedAccount::storage_id(ChainId::Optimism, &eoa())
			)
			.await
			.unwrap());
		assert!(matches!(
			decodify.resolve_participants(ChainId::PolygonPos, &hash(), None).await,
			Err(CoreError::UnsupportedChain(_))
		));
	}

	#[tokio::test]
	async fn test_absent_transaction() {
		let decodify = decodify_with(MockInquirer::new(ChainId::Ethereum));
		let participants = decodify
			.resolve_participants(ChainId::Ethereum, &hash(), None)
			.await
			.unwrap();
		assert!(participants.is_empty());
		assert!(matches!(
			decodify.decode(ChainId::Ethereum, &hash(), &[], None).await,
			Err(CoreError::TransactionNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_participants_exclude_contracts() {
		let decodify = decodify_with(token_transfer_fixture(ChainId::Ethereum));
		let participants = decodify
			.resolve_participants(ChainId::Ethereum, &hash(), None)
			.await
			.unwrap();
		assert_eq!(participants, vec![eoa()]);
		assert!(!decodify
			.storage()
			.exists(StorageKey::Receipts, &format!("ethereum:{}", hash()))
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_transfer_then_approval_and_cleanup() {
		let decodify = decodify_with(token_transfer_fixture(ChainId::Ethereum));

		let events = decodify
			.decode(ChainId::Ethereum, &hash(), &[eoa()], None)
			.await
			.unwrap();
		// Gas fee, token transfer, approval.
		assert_eq!(events.len(), 3);
		assert_eq!(events[0].event_subtype, EventSubtype::Fee);
		assert_eq!(events[1].event_subtype, EventSubtype::None);
		assert_eq!(events[1].amount, U256::from(1_000u64));
		assert_eq!(events[2].event_subtype, EventSubtype::Approve);

		assert!(!decodify
			.registrar()
			.is_tracked(ChainId::Ethereum, &eoa())
			.await
			.unwrap());

		let again = decodify
			.decode(ChainId::Ethereum, &hash(), &[eoa()], None)
			.await
			.unwrap();
		assert_eq!(again, events);
	}

	#[tokio::test]
	async fn test_receiver_side_has_no_fee() {
		let decodify = decodify_with(token_transfer_fixture(ChainId::Ethereum));

		let events = decodify
			.decode(ChainId::Ethereum, &hash(), &[recipient()], None)
			.await
			.unwrap();
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].event_type, EventType::Receive);
		assert_eq!(events[0].event_subtype, EventSubtype::None);
		assert_eq!(events[0].location_label, Some(recipient()));
		assert_eq!(events[0].counterparty, Some(eoa()));
		assert_eq!(events[0].amount, U256::from(1_000u64));
		assert_eq!(events[1].event_type, EventType::Informational);
		assert_eq!(events[1].event_subtype, EventSubtype::Approve);
		assert!(events[0].sequence_index < events[1].sequence_index);

		assert!(!decodify
			.registrar()
			.is_tracked(ChainId::Ethereum, &recipient())
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_fetch_failure_still_releases() {
		let mock = MockInquirer::new(ChainId::Ethereum)
			.with_failure(InquirerError::RateLimited("slow down".into()));
		let decodify = decodify_with(mock);

		let result = decodify
			.decode(ChainId::Ethereum, &hash(), &[eoa()], None)
			.await;
		assert!(matches!(result, Err(CoreError::Fetch(InquirerError::RateLimited(_)))));
		assert!(!decodify
			.registrar()
			.is_tracked(ChainId::Ethereum, &eoa())
			.await
			.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn test_deadline_bounds_remote_calls() {
		let mock = token_transfer_fixture(ChainId::Ethereum).with_latency(Duration::from_secs(3));
		let decodify = decodify_with(mock);

		let deadline = Instant::now() + Duration::from_secs(1);
		let result = decodify
			.decode(ChainId::Ethereum, &hash(), &[eoa()], Some(deadline))
			.await;
		assert!(matches!(result, Err(CoreError::Fetch(InquirerError::Timeout))));
		assert!(!decodify
			.registrar()
			.is_tracked(ChainId::Ethereum, &eoa())
			.await
			.unwrap());
	}
}
