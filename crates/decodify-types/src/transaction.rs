//! Transaction types consumed by the fetcher, classifier and decoders.
//!
//! These are chain-agnostic projections of what remote data sources return,
//! kept small enough to be persisted as JSON in the store.

use crate::{utils::without_0x_prefix, Address, Bytes, ChainId, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string is not a well-formed 32-byte hex hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transaction hash: {0}")]
pub struct InvalidHashError(pub String);

/// 32-byte transaction hash.
///
/// Canonical text form is `0x` followed by 64 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHash(pub B256);

impl TransactionHash {
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0 .0
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl FromStr for TransactionHash {
	type Err = InvalidHashError;

	/// Parses a `0x`-prefixed, 64 hex character hash. The prefix is required.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if !(s.starts_with("0x") || s.starts_with("0X")) {
			return Err(InvalidHashError(s.to_string()));
		}
		let digits = without_0x_prefix(s);
		if digits.len() != 64 {
			return Err(InvalidHashError(s.to_string()));
		}
		let mut bytes = [0u8; 32];
		hex::decode_to_slice(digits, &mut bytes).map_err(|_| InvalidHashError(s.to_string()))?;
		Ok(Self(B256::from(bytes)))
	}
}

impl From<B256> for TransactionHash {
	fn from(hash: B256) -> Self {
		Self(hash)
	}
}

impl Serialize for TransactionHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for TransactionHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// A transaction as reported by a chain's remote data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
	pub chain: ChainId,
	pub hash: TransactionHash,
	pub from: Address,
	/// `None` for contract creation.
	pub to: Option<Address>,
	pub value: U256,
	pub input: Bytes,
	pub gas: u64,
	pub gas_price: u128,
	pub nonce: u64,
	/// `None` while the transaction is pending.
	pub block_number: Option<u64>,
}

impl RawTransaction {
	/// `from` and, unless this is a contract creation, `to`.
	pub fn participants(&self) -> impl Iterator<Item = Address> {
		std::iter::once(self.from).chain(self.to)
	}
}

/// A single log emitted during transaction execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
	/// Position of the log within its block.
	pub log_index: u64,
	/// Contract that emitted the log.
	pub address: Address,
	pub topics: Vec<B256>,
	pub data: Bytes,
}

/// Execution result of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub chain: ChainId,
	pub tx_hash: TransactionHash,
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	pub gas_used: u64,
	pub effective_gas_price: u128,
	/// Set when the transaction deployed a contract.
	pub contract_address: Option<Address>,
	/// Logs in emission order.
	pub logs: Vec<ReceiptLog>,
}

impl TransactionReceipt {
	/// Total fee paid in wei.
	pub fn fee(&self) -> U256 {
		U256::from(self.gas_used) * U256::from(self.effective_gas_price)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

	#[test]
	fn test_hash_round_trips_through_display() {
		let hash: TransactionHash = HASH.parse().unwrap();
		assert_eq!(hash.to_string(), HASH);
	}

	#[test]
	fn test_hash_requires_prefix_and_length() {
		assert!(HASH.trim_start_matches("0x").parse::<TransactionHash>().is_err());
		assert!("0x1234".parse::<TransactionHash>().is_err());
		assert!(format!("{}zz", &HASH[..64]).parse::<TransactionHash>().is_err());
	}

	#[test]
	fn test_hash_display_is_lowercase() {
		let upper = format!("0x{}", HASH[2..].to_uppercase());
		let hash: TransactionHash = upper.parse().unwrap();
		assert_eq!(hash.to_string(), HASH);
	}

	#[test]
	fn test_receipt_fee() {
		let receipt = TransactionReceipt {
			chain: ChainId::Ethereum,
			tx_hash: HASH.parse().unwrap(),
			block_number: 1,
			success: true,
			gas_used: 21_000,
			effective_gas_price: 2_000_000_000,
			contract_address: None,
			logs: vec![],
		};
		assert_eq!(receipt.fee(), U256::from(42_000_000_000_000u64));
	}
}
