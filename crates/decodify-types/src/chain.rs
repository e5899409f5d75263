//! Chain identifiers for the EVM networks decodify can serve.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string names no known chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown chain: {0}")]
pub struct UnknownChainError(pub String);

/// EVM-compatible chains known to decodify.
///
/// Which of these are actually served is decided by configuration; a chain
/// that is known here but not configured is rejected by the chain registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainId {
	Ethereum,
	Optimism,
	PolygonPos,
}

impl ChainId {
	/// Returns the canonical lowercase name used in URLs, config and storage keys.
	pub fn as_str(&self) -> &'static str {
		match self {
			ChainId::Ethereum => "ethereum",
			ChainId::Optimism => "optimism",
			ChainId::PolygonPos => "polygon_pos",
		}
	}

	/// Returns the EIP-155 chain id.
	pub fn evm_chain_id(&self) -> u64 {
		match self {
			ChainId::Ethereum => 1,
			ChainId::Optimism => 10,
			ChainId::PolygonPos => 137,
		}
	}

	/// Symbol of the asset gas is paid in.
	pub fn native_symbol(&self) -> &'static str {
		match self {
			ChainId::Ethereum | ChainId::Optimism => "ETH",
			ChainId::PolygonPos => "POL",
		}
	}

	/// Returns an iterator over all known chains.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Ethereum, Self::Optimism, Self::PolygonPos].into_iter()
	}
}

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ChainId {
	type Err = UnknownChainError;

	/// Accepts the chain name (case-insensitive) or its numeric chain id.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let lowered = s.trim().to_ascii_lowercase();
		if let Ok(id) = lowered.parse::<u64>() {
			return Self::all()
				.find(|chain| chain.evm_chain_id() == id)
				.ok_or_else(|| UnknownChainError(s.to_string()));
		}

		match lowered.as_str() {
			"ethereum" => Ok(Self::Ethereum),
			"optimism" => Ok(Self::Optimism),
			"polygon_pos" => Ok(Self::PolygonPos),
			_ => Err(UnknownChainError(s.to_string())),
		}
	}
}

impl Serialize for ChainId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for ChainId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}
