//! Fixture-backed inquirer for development and tests.
//!
//! Transactions, receipts and contract addresses come from the
//! implementation's configuration table:
//!
//! ```toml
//! [chains.ethereum.inquirer.implementations.mock]
//! contracts = ["0xA0b86991c6218b36c1D19D4a2e9Eb0cE3606eB48"]
//!
//! [[chains.ethereum.inquirer.implementations.mock.transactions]]
//! hash = "0x5c50..."
//! from = "0x742d..."
//! to = "0xA0b8..."
//! value = "0"
//! block_number = 17000000
//!
//! [chains.ethereum.inquirer.implementations.mock.transactions.receipt]
//! success = true
//! gas_used = 52000
//! effective_gas_price = "20000000000"
//! ```

use crate::{ChainEndpoint, InquirerError, InquirerFactory, InquirerInterface, InquirerRegistry};
use async_trait::async_trait;
use decodify_types::{
	parse_address, Address, Bytes, ChainId, ConfigSchema, Field, FieldType,
	ImplementationRegistry, RawTransaction, ReceiptLog, Schema, TransactionHash,
	TransactionReceipt, ValidationError, B256, U256,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bytecode reported for fixture contracts.
const CONTRACT_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

/// Number of calls served, per method.
#[derive(Debug, Default)]
pub struct MockCalls {
	pub transactions: AtomicUsize,
	pub code: AtomicUsize,
	pub receipts: AtomicUsize,
}

impl MockCalls {
	pub fn total(&self) -> usize {
		self.transactions.load(Ordering::SeqCst)
			+ self.code.load(Ordering::SeqCst)
			+ self.receipts.load(Ordering::SeqCst)
	}
}

#[derive(Debug, Clone)]
pub struct MockInquirer {
	chain: ChainId,
	transactions: HashMap<TransactionHash, RawTransaction>,
	receipts: HashMap<TransactionHash, TransactionReceipt>,
	contracts: HashSet<Address>,
	failing_code: HashSet<Address>,
	failure: Option<InquirerError>,
	latency: Duration,
	calls: Arc<MockCalls>,
}

impl MockInquirer {
	pub fn new(chain: ChainId) -> Self {
		Self {
			chain,
			transactions: HashMap::new(),
			receipts: HashMap::new(),
			contracts: HashSet::new(),
			failing_code: HashSet::new(),
			failure: None,
			latency: Duration::ZERO,
			calls: Arc::new(MockCalls::default()),
		}
	}

	pub fn with_transaction(mut self, tx: RawTransaction) -> Self {
		self.transactions.insert(tx.hash, tx);
		self
	}

	pub fn with_receipt(mut self, receipt: TransactionReceipt) -> Self {
		self.receipts.insert(receipt.tx_hash, receipt);
		self
	}

	pub fn with_contract(mut self, address: Address) -> Self {
		self.contracts.insert(address);
		self
	}

	/// `get_code` for `address` fails with a network error.
	pub fn with_failing_code(mut self, address: Address) -> Self {
		self.failing_code.insert(address);
		self
	}

	/// Every call fails with `error`.
	pub fn with_failure(mut self, error: InquirerError) -> Self {
		self.failure = Some(error);
		self
	}

	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = latency;
		self
	}

	/// Shared call counters; stays valid after the mock is boxed.
	pub fn calls(&self) -> Arc<MockCalls> {
		self.calls.clone()
	}

	async fn serve(&self, counter: &AtomicUsize) -> Result<(), InquirerError> {
		counter.fetch_add(1, Ordering::SeqCst);
		if !self.latency.is_zero() {
			tokio::time::sleep(self.latency).await;
		}
		match &self.failure {
			Some(error) => Err(error.clone()),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl InquirerInterface for MockInquirer {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockInquirerSchema)
	}

	async fn get_transaction_by_hash(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<RawTransaction>, InquirerError> {
		self.serve(&self.calls.transactions).await?;
		Ok(self.transactions.get(hash).cloned())
	}

	async fn get_code(&self, address: &Address) -> Result<Bytes, InquirerError> {
		self.serve(&self.calls.code).await?;
		if self.failing_code.contains(address) {
			return Err(InquirerError::Network(format!(
				"code lookup for {} failed on {}",
				address, self.chain
			)));
		}
		if self.contracts.contains(address) {
			Ok(Bytes::from_static(CONTRACT_CODE))
		} else {
			Ok(Bytes::new())
		}
	}

	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, InquirerError> {
		self.serve(&self.calls.receipts).await?;
		Ok(self.receipts.get(hash).cloned())
	}
}

pub struct MockInquirerSchema;

impl ConfigSchema for MockInquirerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("contracts", FieldType::Array(Box::new(FieldType::String))),
				Field::new(
					"latency_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(60_000),
					},
				),
				Field::new(
					"transactions",
					FieldType::Array(Box::new(FieldType::Table(Schema::new(
						vec![
							Field::new("hash", FieldType::String),
							Field::new("from", FieldType::String),
						],
						vec![],
					)))),
				),
			],
		);
		schema.validate(config)
	}
}

#[derive(Debug, Deserialize)]
struct Fixtures {
	#[serde(default)]
	contracts: Vec<String>,
	#[serde(default)]
	latency_ms: u64,
	#[serde(default)]
	transactions: Vec<TransactionFixture>,
}

#[derive(Debug, Deserialize)]
struct TransactionFixture {
	hash: String,
	from: String,
	to: Option<String>,
	#[serde(default = "zero")]
	value: String,
	#[serde(default)]
	input: Option<String>,
	#[serde(default)]
	gas: u64,
	#[serde(default = "zero")]
	gas_price: String,
	#[serde(default)]
	nonce: u64,
	block_number: Option<u64>,
	receipt: Option<ReceiptFixture>,
}

#[derive(Debug, Deserialize)]
struct ReceiptFixture {
	#[serde(default = "default_success")]
	success: bool,
	#[serde(default)]
	gas_used: u64,
	#[serde(default = "zero")]
	effective_gas_price: String,
	contract_address: Option<String>,
	#[serde(default)]
	logs: Vec<LogFixture>,
}

#[derive(Debug, Deserialize)]
struct LogFixture {
	log_index: Option<u64>,
	address: String,
	#[serde(default)]
	topics: Vec<String>,
	#[serde(default)]
	data: Option<String>,
}

fn zero() -> String {
	"0".to_string()
}

fn default_success() -> bool {
	true
}

fn invalid(message: String) -> InquirerError {
	InquirerError::Configuration(format!("mock fixtures: {}", message))
}

fn address(value: &str) -> Result<Address, InquirerError> {
	parse_address(value).map_err(invalid)
}

fn bytes(value: Option<&str>) -> Result<Bytes, InquirerError> {
	match value {
		None => Ok(Bytes::new()),
		Some(hex_str) => hex_str
			.parse()
			.map_err(|e| invalid(format!("invalid hex '{}': {}", hex_str, e))),
	}
}

fn amount(value: &str) -> Result<U256, InquirerError> {
	value
		.parse()
		.map_err(|e| invalid(format!("invalid amount '{}': {}", value, e)))
}

fn gas_price(value: &str) -> Result<u128, InquirerError> {
	value
		.parse()
		.map_err(|e| invalid(format!("invalid gas price '{}': {}", value, e)))
}

impl TransactionFixture {
	fn into_records(
		self,
		chain: ChainId,
	) -> Result<(RawTransaction, Option<TransactionReceipt>), InquirerError> {
		let hash: TransactionHash = self
			.hash
			.parse()
			.map_err(|e: decodify_types::InvalidHashError| invalid(e.to_string()))?;

		let receipt = self
			.receipt
			.map(|receipt| {
				let logs = receipt
					.logs
					.into_iter()
					.enumerate()
					.map(|(position, log)| {
						Ok(ReceiptLog {
							log_index: log.log_index.unwrap_or(position as u64),
							address: address(&log.address)?,
							topics: log
								.topics
								.iter()
								.map(|topic| {
									topic.parse::<B256>().map_err(|e| {
										invalid(format!("invalid topic '{}': {}", topic, e))
									})
								})
								.collect::<Result<_, _>>()?,
							data: bytes(log.data.as_deref())?,
						})
					})
					.collect::<Result<Vec<_>, InquirerError>>()?;

				Ok::<_, InquirerError>(TransactionReceipt {
					chain,
					tx_hash: hash,
					block_number: self.block_number.unwrap_or_default(),
					success: receipt.success,
					gas_used: receipt.gas_used,
					effective_gas_price: gas_price(&receipt.effective_gas_price)?,
					contract_address: receipt
						.contract_address
						.as_deref()
						.map(address)
						.transpose()?,
					logs,
				})
			})
			.transpose()?;

		let tx = RawTransaction {
			chain,
			hash,
			from: address(&self.from)?,
			to: self.to.as_deref().map(address).transpose()?,
			value: amount(&self.value)?,
			input: bytes(self.input.as_deref())?,
			gas: self.gas,
			gas_price: gas_price(&self.gas_price)?,
			nonce: self.nonce,
			block_number: self.block_number,
		};
		Ok((tx, receipt))
	}
}

/// Creates a mock inquirer from its fixture table.
pub fn create_inquirer(
	config: &toml::Value,
	endpoint: &ChainEndpoint,
) -> Result<Box<dyn InquirerInterface>, InquirerError> {
	MockInquirerSchema
		.validate(config)
		.map_err(|e| InquirerError::Configuration(e.to_string()))?;

	let fixtures: Fixtures = config
		.clone()
		.try_into()
		.map_err(|e: toml::de::Error| invalid(e.to_string()))?;

	let mut mock = MockInquirer::new(endpoint.chain)
		.with_latency(Duration::from_millis(fixtures.latency_ms));
	for contract in &fixtures.contracts {
		mock = mock.with_contract(address(contract)?);
	}
	for fixture in fixtures.transactions {
		let (tx, receipt) = fixture.into_records(endpoint.chain)?;
		mock = mock.with_transaction(tx);
		if let Some(receipt) = receipt {
			mock = mock.with_receipt(receipt);
		}
	}

	tracing::info!(
		chain = %endpoint.chain,
		transactions = mock.transactions.len(),
		"Using mock inquirer"
	);
	Ok(Box::new(mock))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = InquirerFactory;

	fn factory() -> Self::Factory {
		create_inquirer
	}
}

impl InquirerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	const HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";
	const TRANSFER_TOPIC: &str =
		"0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

	fn endpoint() -> ChainEndpoint {
		ChainEndpoint {
			chain: ChainId::Optimism,
			nodes: vec![],
			api_key: None,
		}
	}

	#[tokio::test]
	async fn test_fixtures_from_config() {
		let config: toml::Value = toml::from_str(&format!(
			r#"
contracts = ["0xA0b86991c6218b36c1D19D4a2e9Eb0cE3606eB48"]

[[transactions]]
hash = "{HASH}"
from = "0x742d35Cc6634C0532925a3b8D42F3D4C38A5F7F1"
to = "0xA0b86991c6218b36c1D19D4a2e9Eb0cE3606eB48"
block_number = 17000000

[transactions.receipt]
gas_used = 52000
effective_gas_price = "20000000000"

[[transactions.receipt.logs]]
address = "0xA0b86991c6218b36c1D19D4a2e9Eb0cE3606eB48"
topics = ["{TRANSFER_TOPIC}"]
data = "0x01"
"#
		))
		.unwrap();

		let inquirer = create_inquirer(&config, &endpoint()).unwrap();
		let hash: TransactionHash = HASH.parse().unwrap();

		let tx = inquirer.get_transaction_by_hash(&hash).await.unwrap().unwrap();
		assert_eq!(tx.chain, ChainId::Optimism);
		assert_eq!(tx.value, U256::ZERO);
		assert_eq!(tx.block_number, Some(17_000_000));

		let receipt = inquirer.get_transaction_receipt(&hash).await.unwrap().unwrap();
		assert!(receipt.success);
		assert_eq!(receipt.logs.len(), 1);
		assert_eq!(receipt.logs[0].log_index, 0);
		assert_eq!(receipt.logs[0].data, Bytes::from(vec![0x01]));

		let to = tx.to.unwrap();
		assert!(!inquirer.get_code(&to).await.unwrap().is_empty());
		assert!(inquirer.get_code(&tx.from).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_unknown_hash_is_none() {
		let inquirer = create_inquirer(&toml::Value::Table(Default::default()), &endpoint()).unwrap();
		let hash: TransactionHash = HASH.parse().unwrap();
		assert!(inquirer.get_transaction_by_hash(&hash).await.unwrap().is_none());
		assert!(inquirer.get_transaction_receipt(&hash).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_failures_and_counters() {
		let failing = Address::repeat_byte(0x11);
		let mock = MockInquirer::new(ChainId::Ethereum).with_failing_code(failing);
		let calls = mock.calls();

		assert!(matches!(
			mock.get_code(&failing).await,
			Err(InquirerError::Network(_))
		));
		assert!(mock.get_code(&Address::ZERO).await.is_ok());
		assert_eq!(calls.code.load(Ordering::SeqCst), 2);

		let limited = MockInquirer::new(ChainId::Ethereum)
			.with_failure(InquirerError::RateLimited("slow down".into()));
		assert!(matches!(
			limited.get_code(&Address::ZERO).await,
			Err(InquirerError::RateLimited(_))
		));
	}

	#[test]
	fn test_bad_fixture_address_rejected() {
		let config: toml::Value = toml::from_str("contracts = [\"0x1234\"]").unwrap();
		assert!(matches!(
			create_inquirer(&config, &endpoint()),
			Err(InquirerError::Configuration(_))
		));
	}
}
