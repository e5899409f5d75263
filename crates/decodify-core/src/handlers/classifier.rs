//! Address classifier.

use crate::CoreError;
use decodify_inquirer::InquirerService;
use decodify_types::{Address, RawTransaction};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::time::Instant;

/// Tells externally owned accounts apart from contracts by their code.
#[derive(Clone)]
pub struct AddressClassifier {
	inquirer: Arc<InquirerService>,
}

impl AddressClassifier {
	pub fn new(inquirer: Arc<InquirerService>) -> Self {
		Self { inquirer }
	}

	/// Participants of `transaction` that hold no code, `from` first.
	///
	/// Each distinct address is queried once. A single failed query fails
	/// the whole call.
	pub async fn classify_non_contract_participants(
		&self,
		transaction: &RawTransaction,
		deadline: Option<Instant>,
	) -> Result<Vec<Address>, CoreError> {
		let mut candidates: Vec<Address> = Vec::with_capacity(2);
		for address in transaction.participants() {
			if !candidates.contains(&address) {
				candidates.push(address);
			}
		}

		let codes = try_join_all(
			candidates
				.iter()
				.map(|address| self.inquirer.get_code(address, deadline)),
		)
		.await
		.map_err(CoreError::Classification)?;

		Ok(candidates
			.into_iter()
			.zip(codes)
			.filter(|(_, code)| code.is_empty())
			.map(|(address, _)| address)
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_inquirer::implementations::mock::MockInquirer;
	use decodify_types::{ChainId, TransactionHash, B256, U256};
	use std::sync::atomic::Ordering;
	use std::time::Duration;

	fn transaction(from: Address, to: Option<Address>) -> RawTransaction {
		RawTransaction {
			chain: ChainId::Ethereum,
			hash: TransactionHash(B256::repeat_byte(0x01)),
			from,
			to,
			value: U256::ZERO,
			input: Default::default(),
			gas: 21_000,
			gas_price: 1,
			nonce: 0,
			block_number: Some(1),
		}
	}

	fn classifier(mock: MockInquirer) -> AddressClassifier {
		AddressClassifier::new(Arc::new(InquirerService::new(
			ChainId::Ethereum,
			Box::new(mock),
			Duration::from_secs(5),
		)))
	}

	#[tokio::test]
	async fn test_contracts_are_dropped() {
		let eoa = Address::repeat_byte(0xaa);
		let contract = Address::repeat_byte(0xbb);
		let classifier = classifier(MockInquirer::new(ChainId::Ethereum).with_contract(contract));

		let result = classifier
			.classify_non_contract_participants(&transaction(eoa, Some(contract)), None)
			.await
			.unwrap();
		assert_eq!(result, vec![eoa]);
	}

	#[tokio::test]
	async fn test_self_transfer_queried_once() {
		let eoa = Address::repeat_byte(0xaa);
		let mock = MockInquirer::new(ChainId::Ethereum);
		let calls = mock.calls();
		let classifier = classifier(mock);

		let result = classifier
			.classify_non_contract_participants(&transaction(eoa, Some(eoa)), None)
			.await
			.unwrap();
		assert_eq!(result, vec![eoa]);
		assert_eq!(calls.code.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_one_failure_fails_all() {
		let eoa = Address::repeat_byte(0xaa);
		let broken = Address::repeat_byte(0xcc);
		let classifier = classifier(MockInquirer::new(ChainId::Ethereum).with_failing_code(broken));

		let result = classifier
			.classify_non_contract_participants(&transaction(eoa, Some(broken)), None)
			.await;
		assert!(matches!(result, Err(CoreError::Classification(_))));
	}
}
