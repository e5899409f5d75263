//! Etherscan-compatible explorer client.
//!
//! Uses the explorer's JSON-RPC proxy module (`module=proxy`), so responses
//! carry the same shapes as node RPC: hex quantities, `null` for unknown
//! transactions. The multichain API selects the chain with `chainid`.

use crate::{ChainEndpoint, InquirerError, InquirerFactory, InquirerInterface, InquirerRegistry};
use async_trait::async_trait;
use decodify_types::{
	validation::http_url, Address, Bytes, ChainId, ConfigSchema, Field, FieldType,
	ImplementationRegistry, RawTransaction, ReceiptLog, Schema, SecretString, TransactionHash,
	TransactionReceipt, ValidationError, B256, U256,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.etherscan.io/v2/api";

pub struct EtherscanInquirer {
	chain: ChainId,
	client: reqwest::Client,
	base_url: String,
	api_key: Option<SecretString>,
}

impl EtherscanInquirer {
	pub fn new(
		chain: ChainId,
		base_url: String,
		api_key: Option<SecretString>,
		timeout: Duration,
	) -> Result<Self, InquirerError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| InquirerError::Configuration(format!("HTTP client: {}", e)))?;
		Ok(Self {
			chain,
			client,
			base_url,
			api_key,
		})
	}

	/// Calls a proxy action and decodes its `result`.
	///
	/// `Ok(None)` means the explorer returned `null`.
	async fn proxy<T: DeserializeOwned>(
		&self,
		action: &str,
		params: &[(&str, String)],
	) -> Result<Option<T>, InquirerError> {
		let chain_id = self.chain.evm_chain_id().to_string();
		let mut query: Vec<(&str, &str)> = vec![
			("chainid", chain_id.as_str()),
			("module", "proxy"),
			("action", action),
		];
		query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));
		if let Some(key) = &self.api_key {
			query.push(("apikey", key.expose_secret()));
		}

		let response = self
			.client
			.get(&self.base_url)
			.query(&query)
			.send()
			.await
			.map_err(request_error)?;

		if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
			return Err(InquirerError::RateLimited(format!(
				"{} returned 429",
				self.chain
			)));
		}
		if !response.status().is_success() {
			return Err(InquirerError::Network(format!(
				"{} returned HTTP {}",
				action,
				response.status()
			)));
		}

		let body: ProxyResponse = response.json().await.map_err(|e| {
			if e.is_timeout() {
				InquirerError::Timeout
			} else {
				InquirerError::InvalidResponse(e.to_string())
			}
		})?;
		body.into_result(action)
	}
}

fn request_error(e: reqwest::Error) -> InquirerError {
	if e.is_timeout() {
		InquirerError::Timeout
	} else {
		InquirerError::Network(e.to_string())
	}
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
	#[serde(default)]
	status: Option<String>,
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	result: serde_json::Value,
	#[serde(default)]
	error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
	message: String,
}

impl ProxyResponse {
	fn into_result<T: DeserializeOwned>(self, action: &str) -> Result<Option<T>, InquirerError> {
		if let Some(error) = self.error {
			return Err(InquirerError::InvalidResponse(format!(
				"{}: {}",
				action, error.message
			)));
		}

		// Failures outside JSON-RPC come back as status "0" with the reason in `result`.
		if self.status.as_deref() == Some("0") {
			let reason = self
				.result
				.as_str()
				.map(str::to_string)
				.or(self.message)
				.unwrap_or_default();
			return Err(if reason.to_lowercase().contains("rate limit") {
				InquirerError::RateLimited(reason)
			} else {
				InquirerError::InvalidResponse(format!("{}: {}", action, reason))
			});
		}

		if self.result.is_null() {
			return Ok(None);
		}
		serde_json::from_value(self.result)
			.map(Some)
			.map_err(|e| InquirerError::InvalidResponse(format!("{}: {}", action, e)))
	}
}

/// Hex-encoded JSON-RPC quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quantity(u128);

impl<'de> Deserialize<'de> for Quantity {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		let digits = decodify_types::without_0x_prefix(&s);
		if digits.is_empty() {
			return Ok(Quantity(0));
		}
		u128::from_str_radix(digits, 16)
			.map(Quantity)
			.map_err(serde::de::Error::custom)
	}
}

impl Quantity {
	fn as_u64(self) -> Result<u64, InquirerError> {
		u64::try_from(self.0)
			.map_err(|_| InquirerError::InvalidResponse(format!("quantity {} overflows", self.0)))
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
	hash: B256,
	from: Address,
	to: Option<Address>,
	value: U256,
	input: Bytes,
	gas: Quantity,
	gas_price: Option<Quantity>,
	max_fee_per_gas: Option<Quantity>,
	nonce: Quantity,
	block_number: Option<Quantity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceipt {
	transaction_hash: B256,
	block_number: Option<Quantity>,
	status: Option<Quantity>,
	gas_used: Quantity,
	effective_gas_price: Option<Quantity>,
	contract_address: Option<Address>,
	#[serde(default)]
	logs: Vec<WireLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLog {
	address: Address,
	topics: Vec<B256>,
	data: Bytes,
	log_index: Option<Quantity>,
}

impl WireTransaction {
	fn into_raw(self, chain: ChainId) -> Result<RawTransaction, InquirerError> {
		let gas_price = self
			.gas_price
			.or(self.max_fee_per_gas)
			.map(|q| q.0)
			.unwrap_or_default();
		Ok(RawTransaction {
			chain,
			hash: TransactionHash(self.hash),
			from: self.from,
			to: self.to,
			value: self.value,
			input: self.input,
			gas: self.gas.as_u64()?,
			gas_price,
			nonce: self.nonce.as_u64()?,
			block_number: self.block_number.map(Quantity::as_u64).transpose()?,
		})
	}
}

impl WireReceipt {
	/// `None` while the receipt has no block, i.e. the transaction is pending.
	fn into_receipt(self, chain: ChainId) -> Result<Option<TransactionReceipt>, InquirerError> {
		let Some(block_number) = self.block_number else {
			return Ok(None);
		};

		let mut logs = self
			.logs
			.into_iter()
			.enumerate()
			.map(|(position, log)| {
				Ok(ReceiptLog {
					log_index: match log.log_index {
						Some(index) => index.as_u64()?,
						None => position as u64,
					},
					address: log.address,
					topics: log.topics,
					data: log.data,
				})
			})
			.collect::<Result<Vec<_>, InquirerError>>()?;
		logs.sort_by_key(|log| log.log_index);

		Ok(Some(TransactionReceipt {
			chain,
			tx_hash: TransactionHash(self.transaction_hash),
			block_number: block_number.as_u64()?,
			// Pre-Byzantium receipts carry no status.
			success: self.status.map_or(true, |status| status.0 == 1),
			gas_used: self.gas_used.as_u64()?,
			effective_gas_price: self.effective_gas_price.map(|q| q.0).unwrap_or_default(),
			contract_address: self.contract_address,
			logs,
		}))
	}
}

#[async_trait]
impl InquirerInterface for EtherscanInquirer {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EtherscanInquirerSchema)
	}

	async fn get_transaction_by_hash(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<RawTransaction>, InquirerError> {
		let wire: Option<WireTransaction> = self
			.proxy("eth_getTransactionByHash", &[("txhash", hash.to_string())])
			.await?;
		wire.map(|tx| tx.into_raw(self.chain)).transpose()
	}

	async fn get_code(&self, address: &Address) -> Result<Bytes, InquirerError> {
		let code: Option<Bytes> = self
			.proxy(
				"eth_getCode",
				&[
					("address", address.to_string()),
					("tag", "latest".to_string()),
				],
			)
			.await?;
		Ok(code.unwrap_or_default())
	}

	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, InquirerError> {
		let wire: Option<WireReceipt> = self
			.proxy("eth_getTransactionReceipt", &[("txhash", hash.to_string())])
			.await?;
		match wire {
			Some(receipt) => receipt.into_receipt(self.chain),
			None => Ok(None),
		}
	}
}

pub struct EtherscanInquirerSchema;

impl ConfigSchema for EtherscanInquirerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("base_url", FieldType::String).with_validator(http_url),
				Field::new(
					"timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Creates an explorer client.
///
/// Configuration:
/// - `base_url`: explorer API URL (default: the Etherscan multichain API)
/// - `timeout_seconds`: HTTP client timeout (default 30)
///
/// The API key comes from the chain's stored credential.
pub fn create_inquirer(
	config: &toml::Value,
	endpoint: &ChainEndpoint,
) -> Result<Box<dyn InquirerInterface>, InquirerError> {
	EtherscanInquirerSchema
		.validate(config)
		.map_err(|e| InquirerError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_BASE_URL)
		.to_string();
	let timeout = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.unwrap_or(30) as u64;

	if endpoint.api_key.is_none() {
		tracing::warn!(chain = %endpoint.chain, "No explorer API key stored, requests may be throttled");
	}

	Ok(Box::new(EtherscanInquirer::new(
		endpoint.chain,
		base_url,
		endpoint.api_key.clone(),
		Duration::from_secs(timeout),
	)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "etherscan";
	type Factory = InquirerFactory;

	fn factory() -> Self::Factory {
		create_inquirer
	}
}

impl InquirerRegistry for Registry {}
