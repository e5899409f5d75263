//! JSON-RPC inquirer built on the Alloy provider.
//!
//! One HTTP provider is opened per active node of the chain, tried in order
//! of descending weight. A request moves on to the next node only when the
//! current one fails at the transport level or throttles; a well-formed answer,
//! including "unknown hash", is final.

use crate::{ChainEndpoint, InquirerError, InquirerFactory, InquirerInterface, InquirerRegistry};
use alloy_consensus::Transaction as _;
use alloy_provider::{Provider, RootProvider};
use alloy_transport_http::Http;
use async_trait::async_trait;
use decodify_types::{
	validation::http_url, Address, Bytes, ChainId, ConfigSchema, Field, FieldType,
	ImplementationRegistry, RawTransaction, ReceiptLog, Schema, TransactionHash,
	TransactionReceipt, ValidationError,
};
use std::fmt::Display;
use std::future::Future;

struct Node {
	name: String,
	provider: RootProvider<Http<reqwest::Client>>,
}

/// Alloy-based EVM inquirer.
pub struct AlloyInquirer {
	chain: ChainId,
	nodes: Vec<Node>,
}

impl AlloyInquirer {
	/// Opens a provider for each `(name, url)` pair, keeping their order.
	pub fn new(chain: ChainId, endpoints: Vec<(String, String)>) -> Result<Self, InquirerError> {
		if endpoints.is_empty() {
			return Err(InquirerError::Configuration(format!(
				"No active RPC node for {}",
				chain
			)));
		}

		let nodes = endpoints
			.into_iter()
			.map(|(name, url)| {
				let parsed = url.parse().map_err(|e| {
					InquirerError::Configuration(format!("Invalid RPC URL for node {}: {}", name, e))
				})?;
				Ok(Node {
					name,
					provider: RootProvider::new_http(parsed),
				})
			})
			.collect::<Result<Vec<_>, InquirerError>>()?;

		Ok(Self { chain, nodes })
	}

	/// Runs `call` against each node in turn until one answers.
	async fn with_failover<'a, T, F, Fut>(&'a self, call: F) -> Result<T, InquirerError>
	where
		F: Fn(&'a RootProvider<Http<reqwest::Client>>) -> Fut,
		Fut: Future<Output = Result<T, InquirerError>>,
	{
		let mut last_error = InquirerError::Network("no node attempted".to_string());
		for node in &self.nodes {
			match call(&node.provider).await {
				Ok(value) => return Ok(value),
				Err(e @ (InquirerError::Network(_) | InquirerError::RateLimited(_))) => {
					tracing::warn!(chain = %self.chain, node = %node.name, error = %e, "RPC node failed, trying next");
					last_error = e;
				},
				Err(e) => return Err(e),
			}
		}
		Err(last_error)
	}
}

fn transport_error(e: impl Display) -> InquirerError {
	let message = e.to_string();
	let lowered = message.to_lowercase();
	if lowered.contains("429") || lowered.contains("rate limit") {
		InquirerError::RateLimited(message)
	} else {
		InquirerError::Network(message)
	}
}

fn convert_transaction(
	chain: ChainId,
	hash: &TransactionHash,
	tx: alloy_rpc_types::Transaction,
) -> RawTransaction {
	let gas_price = tx
		.effective_gas_price
		.or_else(|| tx.gas_price())
		.unwrap_or_else(|| tx.max_fee_per_gas());
	RawTransaction {
		chain,
		hash: *hash,
		from: tx.from,
		to: tx.to(),
		value: tx.value(),
		input: tx.input().clone(),
		gas: tx.gas_limit(),
		gas_price,
		nonce: tx.nonce(),
		block_number: tx.block_number,
	}
}

fn convert_receipt(
	chain: ChainId,
	receipt: alloy_rpc_types::TransactionReceipt,
) -> Result<Option<TransactionReceipt>, InquirerError> {
	let Some(block_number) = receipt.block_number else {
		return Ok(None);
	};

	let mut logs: Vec<ReceiptLog> = receipt
		.inner
		.logs()
		.iter()
		.enumerate()
		.map(|(position, log)| ReceiptLog {
			log_index: log.log_index.unwrap_or(position as u64),
			address: log.address(),
			topics: log.topics().to_vec(),
			data: log.data().data.clone(),
		})
		.collect();
	logs.sort_by_key(|log| log.log_index);

	let gas_used = u64::try_from(receipt.gas_used)
		.map_err(|_| InquirerError::InvalidResponse("gas used overflows u64".to_string()))?;

	Ok(Some(TransactionReceipt {
		chain,
		tx_hash: TransactionHash(receipt.transaction_hash),
		block_number,
		success: receipt.status(),
		gas_used,
		effective_gas_price: receipt.effective_gas_price,
		contract_address: receipt.contract_address,
		logs,
	}))
}

#[async_trait]
impl InquirerInterface for AlloyInquirer {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyInquirerSchema)
	}

	async fn get_transaction_by_hash(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<RawTransaction>, InquirerError> {
		let tx = self
			.with_failover(|provider| async move {
				provider
					.get_transaction_by_hash(hash.0)
					.await
					.map_err(transport_error)
			})
			.await?;
		Ok(tx.map(|tx| convert_transaction(self.chain, hash, tx)))
	}

	async fn get_code(&self, address: &Address) -> Result<Bytes, InquirerError> {
		let address = *address;
		self.with_failover(|provider| async move {
			provider.get_code_at(address).await.map_err(transport_error)
		})
		.await
	}

	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, InquirerError> {
		let receipt = self
			.with_failover(|provider| async move {
				provider
					.get_transaction_receipt(hash.0)
					.await
					.map_err(transport_error)
			})
			.await?;
		match receipt {
			Some(receipt) => convert_receipt(self.chain, receipt),
			None => Ok(None),
		}
	}
}

pub struct AlloyInquirerSchema;

impl ConfigSchema for AlloyInquirerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("url", FieldType::String).with_validator(http_url)],
		);
		schema.validate(config)
	}
}

/// Creates an RPC inquirer over the chain's active nodes.
///
/// Configuration:
/// - `url`: single endpoint that replaces the stored node list
pub fn create_inquirer(
	config: &toml::Value,
	endpoint: &ChainEndpoint,
) -> Result<Box<dyn InquirerInterface>, InquirerError> {
	AlloyInquirerSchema
		.validate(config)
		.map_err(|e| InquirerError::Configuration(e.to_string()))?;

	let endpoints = match config.get("url").and_then(|v| v.as_str()) {
		Some(url) => vec![("override".to_string(), url.to_string())],
		None => endpoint
			.active_nodes()
			.into_iter()
			.map(|node| (node.name.clone(), node.endpoint.clone()))
			.collect(),
	};

	tracing::debug!(chain = %endpoint.chain, nodes = endpoints.len(), "Opening RPC providers");
	Ok(Box::new(AlloyInquirer::new(endpoint.chain, endpoints)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "rpc";
	type Factory = InquirerFactory;

	fn factory() -> Self::Factory {
		create_inquirer
	}
}

impl InquirerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_types::RpcNode;

	fn endpoint(nodes: Vec<RpcNode>) -> ChainEndpoint {
		ChainEndpoint {
			chain: ChainId::Optimism,
			nodes,
			api_key: None,
		}
	}

	#[test]
	fn test_requires_an_active_node() {
		let inactive = RpcNode {
			name: "primary".to_string(),
			endpoint: "https://mainnet.optimism.io".to_string(),
			owned: false,
			active: false,
			weight: 1.0,
			chain: ChainId::Optimism,
		};
		let result = create_inquirer(
			&toml::Value::Table(Default::default()),
			&endpoint(vec![inactive]),
		);
		assert!(matches!(result, Err(InquirerError::Configuration(_))));
	}

	#[test]
	fn test_url_override_needs_no_nodes() {
		let mut table = toml::map::Map::new();
		table.insert(
			"url".to_string(),
			toml::Value::String("http://localhost:8545".to_string()),
		);
		assert!(create_inquirer(&toml::Value::Table(table), &endpoint(vec![])).is_ok());
	}

	#[test]
	fn test_rejects_non_http_url() {
		let mut table = toml::map::Map::new();
		table.insert(
			"url".to_string(),
			toml::Value::String("ws://localhost:8545".to_string()),
		);
		assert!(create_inquirer(&toml::Value::Table(table), &endpoint(vec![])).is_err());
	}

	#[test]
	fn test_transport_error_classification() {
		assert!(matches!(
			transport_error("HTTP error 429 with body: Too Many Requests"),
			InquirerError::RateLimited(_)
		));
		assert!(matches!(
			transport_error("connection refused"),
			InquirerError::Network(_)
		));
	}
}
