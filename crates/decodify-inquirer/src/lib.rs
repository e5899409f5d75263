//! Remote data sources for chain data.
//!
//! An inquirer answers three questions about one chain: what a transaction
//! looks like, whether an address holds code, and what a mined transaction's
//! receipt is. Implementations are selected per chain by name from
//! configuration; [`InquirerService`] wraps the selected one and bounds every
//! call by the caller's deadline and the chain's request timeout.

use async_trait::async_trait;
use decodify_types::{
	Address, Bytes, ChainId, ConfigSchema, ImplementationRegistry, RawTransaction, RpcNode,
	SecretString, TransactionHash, TransactionReceipt,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub mod implementations {
	pub mod etherscan;
	pub mod mock;
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors returned by remote data sources.
#[derive(Debug, Clone, Error)]
pub enum InquirerError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Request timed out")]
	Timeout,
	#[error("Rate limited: {0}")]
	RateLimited(String),
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Interface implemented by every remote data source.
#[async_trait]
pub trait InquirerInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Returns `None` when the remote does not know the hash.
	async fn get_transaction_by_hash(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<RawTransaction>, InquirerError>;

	/// Bytecode at `address` on the latest block; empty for plain accounts.
	async fn get_code(&self, address: &Address) -> Result<Bytes, InquirerError>;

	/// Returns `None` when the transaction is unknown or still pending.
	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, InquirerError>;
}

/// What a factory knows about the chain it builds an inquirer for, read from
/// the RPC-node and credential tables at startup.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
	pub chain: ChainId,
	/// Known nodes for the chain, active or not.
	pub nodes: Vec<RpcNode>,
	/// Explorer API key, when one is stored.
	pub api_key: Option<SecretString>,
}

impl ChainEndpoint {
	/// Active nodes ordered by descending weight.
	pub fn active_nodes(&self) -> Vec<&RpcNode> {
		let mut nodes: Vec<&RpcNode> = self
			.nodes
			.iter()
			.filter(|node| node.active && !node.endpoint.is_empty())
			.collect();
		nodes.sort_by(|a, b| b.weight.total_cmp(&a.weight));
		nodes
	}
}

/// Factory function type every inquirer implementation provides.
pub type InquirerFactory =
	fn(&toml::Value, &ChainEndpoint) -> Result<Box<dyn InquirerInterface>, InquirerError>;

pub trait InquirerRegistry: ImplementationRegistry<Factory = InquirerFactory> {}

/// All inquirer implementations, as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, InquirerFactory)> {
	use implementations::{etherscan, evm::alloy, mock};

	vec![
		(etherscan::Registry::NAME, etherscan::Registry::factory()),
		(alloy::Registry::NAME, alloy::Registry::factory()),
		(mock::Registry::NAME, mock::Registry::factory()),
	]
}

/// Runs `fut` until `deadline`, failing with [`InquirerError::Timeout`] past it.
pub async fn with_deadline<T, F>(deadline: Instant, fut: F) -> Result<T, InquirerError>
where
	F: Future<Output = Result<T, InquirerError>>,
{
	tokio::time::timeout_at(deadline, fut)
		.await
		.map_err(|_| InquirerError::Timeout)?
}

/// The inquirer of one chain, with every call bounded in time.
pub struct InquirerService {
	chain: ChainId,
	implementation: Box<dyn InquirerInterface>,
	request_timeout: Duration,
}

impl InquirerService {
	pub fn new(
		chain: ChainId,
		implementation: Box<dyn InquirerInterface>,
		request_timeout: Duration,
	) -> Self {
		Self {
			chain,
			implementation,
			request_timeout,
		}
	}

	pub fn chain(&self) -> ChainId {
		self.chain
	}

	/// The earlier of the caller's deadline and one request timeout from now.
	fn effective_deadline(&self, deadline: Option<Instant>) -> Instant {
		let own = Instant::now() + self.request_timeout;
		deadline.map_or(own, |d| d.min(own))
	}

	pub async fn get_transaction_by_hash(
		&self,
		hash: &TransactionHash,
		deadline: Option<Instant>,
	) -> Result<Option<RawTransaction>, InquirerError> {
		tracing::debug!(chain = %self.chain, tx_hash = %hash, "Querying transaction");
		with_deadline(
			self.effective_deadline(deadline),
			self.implementation.get_transaction_by_hash(hash),
		)
		.await
	}

	pub async fn get_code(
		&self,
		address: &Address,
		deadline: Option<Instant>,
	) -> Result<Bytes, InquirerError> {
		tracing::debug!(chain = %self.chain, address = %address, "Querying code");
		with_deadline(
			self.effective_deadline(deadline),
			self.implementation.get_code(address),
		)
		.await
	}

	pub async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
		deadline: Option<Instant>,
	) -> Result<Option<TransactionReceipt>, InquirerError> {
		tracing::debug!(chain = %self.chain, tx_hash = %hash, "Querying receipt");
		with_deadline(
			self.effective_deadline(deadline),
			self.implementation.get_transaction_receipt(hash),
		)
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::mock::MockInquirer;

	fn node(name: &str, weight: f64, active: bool) -> RpcNode {
		RpcNode {
			name: name.to_string(),
			endpoint: format!("https://{}.example.org", name),
			owned: false,
			active,
			weight,
			chain: ChainId::Ethereum,
		}
	}

	#[test]
	fn test_active_nodes_by_weight() {
		let endpoint = ChainEndpoint {
			chain: ChainId::Ethereum,
			nodes: vec![
				node("low", 0.2, true),
				node("off", 1.0, false),
				node("high", 0.9, true),
			],
			api_key: None,
		};
		let names: Vec<_> = endpoint
			.active_nodes()
			.into_iter()
			.map(|n| n.name.as_str())
			.collect();
		assert_eq!(names, vec!["high", "low"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_deadline_turns_into_timeout() {
		let mock = MockInquirer::new(ChainId::Ethereum).with_latency(Duration::from_secs(5));
		let service = InquirerService::new(
			ChainId::Ethereum,
			Box::new(mock),
			Duration::from_secs(60),
		);

		let deadline = Instant::now() + Duration::from_secs(1);
		let result = service
			.get_code(&Address::ZERO, Some(deadline))
			.await;
		assert!(matches!(result, Err(InquirerError::Timeout)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_request_timeout_applies_without_deadline() {
		let mock = MockInquirer::new(ChainId::Ethereum).with_latency(Duration::from_secs(5));
		let service =
			InquirerService::new(ChainId::Ethereum, Box::new(mock), Duration::from_secs(2));
		assert!(matches!(
			service.get_code(&Address::ZERO, None).await,
			Err(InquirerError::Timeout)
		));
	}
}
