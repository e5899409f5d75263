//! Records kept in the persistent store: tracked accounts, RPC nodes and
//! credentials for external data providers.

use crate::{Address, ChainId, SecretString};
use serde::{Deserialize, Serialize};

/// An address the store considers "of interest" on a chain.
///
/// `pinned` accounts come from configuration and are never removed by decode
/// scopes. `scoped_holds` counts the decode scopes currently relying on the
/// record; a non-pinned record with no holds must not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAccount {
	pub chain: ChainId,
	pub address: Address,
	#[serde(default)]
	pub pinned: bool,
	#[serde(default)]
	pub scoped_holds: u32,
}

impl TrackedAccount {
	/// Storage id of the record, `<chain>:<lowercase address>`.
	pub fn storage_id(chain: ChainId, address: &Address) -> String {
		format!("{}:{}", chain, hex::encode(address))
	}
}

/// A remote data-source endpoint for one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcNode {
	pub name: String,
	pub endpoint: String,
	/// Whether the node is operated by us rather than a third party.
	pub owned: bool,
	pub active: bool,
	pub weight: f64,
	pub chain: ChainId,
}

impl RpcNode {
	/// Storage id of the record, `<chain>:<name>`.
	pub fn storage_id(&self) -> String {
		format!("{}:{}", self.chain, self.name)
	}
}

/// External data providers that need an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalService {
	Etherscan,
	OptimismEtherscan,
	PolygonPosEtherscan,
}

impl ExternalService {
	/// The explorer service that serves `chain`.
	pub fn explorer_for(chain: ChainId) -> Self {
		match chain {
			ChainId::Ethereum => Self::Etherscan,
			ChainId::Optimism => Self::OptimismEtherscan,
			ChainId::PolygonPos => Self::PolygonPosEtherscan,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Etherscan => "etherscan",
			Self::OptimismEtherscan => "optimism_etherscan",
			Self::PolygonPosEtherscan => "polygon_pos_etherscan",
		}
	}
}

/// API credential for one external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServiceCredential {
	pub service: ExternalService,
	#[serde(serialize_with = "crate::secret_string::serialize_exposed")]
	pub api_key: SecretString,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_account_storage_id_is_lowercase() {
		let address: Address = "0x742d35Cc6634C0532925a3b8D42F3D4C38A5F7F1".parse().unwrap();
		assert_eq!(
			TrackedAccount::storage_id(ChainId::Optimism, &address),
			"optimism:742d35cc6634c0532925a3b8d42f3d4c38a5f7f1"
		);
	}

	#[test]
	fn test_tracked_account_defaults() {
		let json = r#"{"chain":"ethereum","address":"0x742d35cc6634c0532925a3b8d42f3d4c38a5f7f1"}"#;
		let account: TrackedAccount = serde_json::from_str(json).unwrap();
		assert!(!account.pinned);
		assert_eq!(account.scoped_holds, 0);
	}

	#[test]
	fn test_stored_credential_keeps_key() {
		let credential = ExternalServiceCredential {
			service: ExternalService::OptimismEtherscan,
			api_key: SecretString::from("key-1"),
		};
		let json = serde_json::to_string(&credential).unwrap();
		let back: ExternalServiceCredential = serde_json::from_str(&json).unwrap();
		assert_eq!(back.api_key.expose_secret(), "key-1");
		assert_eq!(back.service, ExternalService::OptimismEtherscan);
	}
}
