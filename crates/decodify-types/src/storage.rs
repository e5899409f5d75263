//! Storage namespaces.

use std::str::FromStr;

/// Namespaces of the persistent store.
///
/// Keys are built as `<namespace>:<id>`, see [`StorageKey::key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Tracked accounts, id `<chain>:<address>`.
	Accounts,
	/// Remote data-source endpoints, id `<chain>:<name>`.
	RpcNodes,
	/// API keys of external services, id `<service>`.
	Credentials,
	/// Raw transactions, id `<chain>:<hash>`.
	Transactions,
	/// Receipts, id `<chain>:<hash>`.
	Receipts,
	/// Decoder output, id `<chain>:<hash>`.
	DecodedEvents,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Accounts => "accounts",
			StorageKey::RpcNodes => "rpc_nodes",
			StorageKey::Credentials => "credentials",
			StorageKey::Transactions => "transactions",
			StorageKey::Receipts => "receipts",
			StorageKey::DecodedEvents => "decoded_events",
		}
	}

	/// Full storage key of `id` in this namespace.
	pub fn key(&self, id: &str) -> String {
		format!("{}:{}", self.as_str(), id)
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Accounts,
			Self::RpcNodes,
			Self::Credentials,
			Self::Transactions,
			Self::Receipts,
			Self::DecodedEvents,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_key_layout() {
		assert_eq!(
			StorageKey::DecodedEvents.key("ethereum:0xabc"),
			"decoded_events:ethereum:0xabc"
		);
		assert_eq!("rpc_nodes".parse::<StorageKey>(), Ok(StorageKey::RpcNodes));
		assert!("orders".parse::<StorageKey>().is_err());
	}
}
