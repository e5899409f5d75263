//! Decoded economic events.

use crate::{Address, ChainId, TransactionHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an event relative to the tracked accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
	/// Value left a tracked account.
	Spend,
	/// Value arrived at a tracked account.
	Receive,
	/// Value moved between two tracked accounts.
	Transfer,
	/// No tracked account on either side, or no value moved.
	Informational,
	/// Native asset wrapped into its token form.
	Deposit,
	/// Wrapped token unwrapped back to the native asset.
	Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSubtype {
	None,
	Fee,
	Approve,
	DepositAsset,
	RemoveAsset,
}

/// The asset an event moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
	/// The chain's gas asset.
	Native { symbol: String },
	Erc20 {
		#[serde(with = "checksummed")]
		address: Address,
	},
	Erc721 {
		#[serde(with = "checksummed")]
		address: Address,
		#[serde(with = "u256_decimal")]
		token_id: U256,
	},
}

impl Asset {
	pub fn native(chain: ChainId) -> Self {
		Asset::Native {
			symbol: chain.native_symbol().to_string(),
		}
	}
}

impl fmt::Display for Asset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Asset::Native { symbol } => f.write_str(symbol),
			Asset::Erc20 { address } => write!(f, "ERC20 token {}", address),
			Asset::Erc721 { address, token_id } => {
				write!(f, "ERC721 token {} #{}", address, token_id)
			},
		}
	}
}

/// One economic event of a transaction, as seen from `location_label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
	pub tx_hash: TransactionHash,
	pub chain: ChainId,
	/// Position of the event in the decoder output.
	pub sequence_index: u32,
	pub event_type: EventType,
	pub event_subtype: EventSubtype,
	pub asset: Asset,
	/// Raw integer units.
	#[serde(with = "u256_decimal")]
	pub amount: U256,
	/// Tracked address the event is seen from.
	#[serde(with = "checksummed_opt")]
	pub location_label: Option<Address>,
	#[serde(with = "checksummed_opt")]
	pub counterparty: Option<Address>,
	/// Contract the event was read from.
	#[serde(with = "checksummed_opt")]
	pub address: Option<Address>,
	pub notes: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extra_data: Option<serde_json::Value>,
}

/// U256 as a decimal string.
pub mod u256_decimal {
	use alloy_primitives::U256;
	use serde::{de::Error, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(value)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
		let s = String::deserialize(deserializer)?;
		U256::from_str_radix(&s, 10).map_err(D::Error::custom)
	}
}

/// Address as an EIP-55 checksummed string.
pub mod checksummed {
	use alloy_primitives::Address;
	use serde::{de::Error, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Address, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&value.to_checksum(None))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(D::Error::custom)
	}
}

pub mod checksummed_opt {
	use alloy_primitives::Address;
	use serde::{de::Error, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(
		value: &Option<Address>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		match value {
			Some(address) => serializer.serialize_str(&address.to_checksum(None)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<Address>, D::Error> {
		Option::<String>::deserialize(deserializer)?
			.map(|s| s.parse().map_err(D::Error::custom))
			.transpose()
	}
}
