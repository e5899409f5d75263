//! Transaction fetcher.
//!
//! Reads transactions through the chain's inquirer and keeps the records the
//! decoder needs (transaction and receipt) in the store.

use crate::CoreError;
use decodify_inquirer::InquirerService;
use decodify_storage::StorageService;
use decodify_types::{RawTransaction, StorageKey, TransactionHash, TransactionReceipt};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone)]
pub struct TransactionService {
	inquirer: Arc<InquirerService>,
	storage: Arc<StorageService>,
}

impl TransactionService {
	pub fn new(inquirer: Arc<InquirerService>, storage: Arc<StorageService>) -> Self {
		Self { inquirer, storage }
	}

	fn storage_id(&self, hash: &TransactionHash) -> String {
		format!("{}:{}", self.inquirer.chain(), hash)
	}

	/// Looks the transaction up remotely. Nothing is persisted.
	pub async fn fetch(
		&self,
		hash: &TransactionHash,
		deadline: Option<Instant>,
	) -> Result<Option<RawTransaction>, CoreError> {
		Ok(self.inquirer.get_transaction_by_hash(hash, deadline).await?)
	}

	/// Returns the receipt of a mined transaction, fetching and persisting it
	/// together with the transaction when either is missing from the store.
	///
	/// Unknown and pending transactions both fail with
	/// [`CoreError::TransactionNotFound`].
	pub async fn ensure_receipt(
		&self,
		hash: &TransactionHash,
		deadline: Option<Instant>,
	) -> Result<TransactionReceipt, CoreError> {
		let id = self.storage_id(hash);
		let stored: Option<RawTransaction> = self.storage.find(StorageKey::Transactions, &id).await?;
		if stored.is_some() {
			if let Some(receipt) = self.storage.find(StorageKey::Receipts, &id).await? {
				return Ok(receipt);
			}
		}

		let mut transaction = match stored {
			Some(transaction) => transaction,
			None => self
				.fetch(hash, deadline)
				.await?
				.ok_or(CoreError::TransactionNotFound(*hash))?,
		};
		let receipt = self
			.inquirer
			.get_transaction_receipt(hash, deadline)
			.await?
			.ok_or(CoreError::TransactionNotFound(*hash))?;

		// Fetched while pending.
		if transaction.block_number.is_none() {
			transaction.block_number = Some(receipt.block_number);
		}

		self.storage
			.store(StorageKey::Transactions, &id, &transaction)
			.await?;
		self.storage.store(StorageKey::Receipts, &id, &receipt).await?;
		tracing::debug!(
			chain = %self.inquirer.chain(),
			tx_hash = %hash,
			logs = receipt.logs.len(),
			"Stored transaction receipt"
		);
		Ok(receipt)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_inquirer::implementations::mock::MockInquirer;
	use decodify_storage::implementations::memory::MemoryStorage;
	use decodify_types::{Address, ChainId, B256, U256};
	use std::sync::atomic::Ordering;
	use std::time::Duration;

	fn records(hash: TransactionHash) -> (RawTransaction, TransactionReceipt) {
		let transaction = RawTransaction {
			chain: ChainId::Optimism,
			hash,
			from: Address::repeat_byte(0x01),
			to: Some(Address::repeat_byte(0x02)),
			value: U256::ZERO,
			input: Default::default(),
			gas: 21_000,
			gas_price: 1,
			nonce: 0,
			block_number: None,
		};
		let receipt = TransactionReceipt {
			chain: ChainId::Optimism,
			tx_hash: hash,
			block_number: 77,
			success: true,
			gas_used: 21_000,
			effective_gas_price: 1,
			contract_address: None,
			logs: vec![],
		};
		(transaction, receipt)
	}

	fn service(mock: MockInquirer) -> (TransactionService, Arc<StorageService>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let inquirer = Arc::new(InquirerService::new(
			ChainId::Optimism,
			Box::new(mock),
			Duration::from_secs(5),
		));
		(TransactionService::new(inquirer, storage.clone()), storage)
	}

	#[tokio::test]
	async fn test_ensure_receipt_persists_once() {
		let hash = TransactionHash(B256::repeat_byte(0x0a));
		let (transaction, receipt) = records(hash);
		let mock = MockInquirer::new(ChainId::Optimism)
			.with_transaction(transaction)
			.with_receipt(receipt.clone());
		let calls = mock.calls();
		let (service, storage) = service(mock);

		assert_eq!(service.ensure_receipt(&hash, None).await.unwrap(), receipt);
		assert_eq!(service.ensure_receipt(&hash, None).await.unwrap(), receipt);
		assert_eq!(calls.receipts.load(Ordering::SeqCst), 1);

		let stored: RawTransaction = storage
			.retrieve(StorageKey::Transactions, &format!("optimism:{}", hash))
			.await
			.unwrap();
		assert_eq!(stored.block_number, Some(77));
	}

	#[tokio::test]
	async fn test_unknown_and_pending_are_not_found() {
		let unknown = TransactionHash(B256::repeat_byte(0x0b));
		let pending = TransactionHash(B256::repeat_byte(0x0c));
		let (transaction, _) = records(pending);
		let (service, storage) = service(MockInquirer::new(ChainId::Optimism).with_transaction(transaction));

		assert!(service.fetch(&unknown, None).await.unwrap().is_none());
		assert!(matches!(
			service.ensure_receipt(&unknown, None).await,
			Err(CoreError::TransactionNotFound(_))
		));
		assert!(matches!(
			service.ensure_receipt(&pending, None).await,
			Err(CoreError::TransactionNotFound(_))
		));
		assert!(!storage
			.exists(StorageKey::Transactions, &format!("optimism:{}", pending))
			.await
			.unwrap());
	}
}
