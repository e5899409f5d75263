//! Storage module for the decodify service.
//!
//! Provides a key/value [`StorageInterface`] with pluggable backends and a
//! typed [`StorageService`] that stores JSON values under
//! `<namespace>:<id>` keys. Besides single-key operations the interface offers
//! [`StorageInterface::update_many`], a read-modify-write over several keys
//! that no other writer can interleave with.

use async_trait::async_trait;
use decodify_types::{ConfigSchema, ImplementationRegistry, StorageKey};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// Raised by an `update_many` closure to abort the batch without writing.
	#[error("Batch aborted: {0}")]
	Aborted(String),
}

/// Closure applied by [`StorageInterface::update_many`].
///
/// Receives the current value of every key (`None` when absent or expired)
/// in the order the keys were given, and returns the new values in the same
/// order. `None` deletes the key. Returning an error aborts the batch and
/// leaves every key untouched.
pub type BatchUpdate<'a> = Box<
	dyn FnOnce(Vec<Option<Vec<u8>>>) -> Result<Vec<Option<Vec<u8>>>, StorageError> + Send + 'a,
>;

/// Low-level interface implemented by storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes. When `ttl` is `None` the namespace default applies.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deleting an absent key succeeds.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Reads `keys`, applies `update` and writes the result as one unit.
	///
	/// Concurrent batches touching any of the same keys are serialized. The
	/// backend holds its lock only for the duration of the batch itself.
	async fn update_many<'a>(
		&'a self,
		keys: &'a [String],
		update: BatchUpdate<'a>,
	) -> Result<(), StorageError>;

	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Factory function type every storage implementation provides.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// All storage implementations, as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Per-namespace default TTLs, read from `ttl_<namespace>` keys of a
/// backend's configuration table. Zero or missing means no expiry.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	pub fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();

		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(seconds) = table
					.get(&config_key)
					.and_then(|v| v.as_integer())
					.filter(|v| *v > 0)
				{
					ttls.insert(storage_key, Duration::from_secs(seconds as u64));
				}
			}
		}

		Self { ttls }
	}

	pub fn with_ttl(mut self, storage_key: StorageKey, ttl: Duration) -> Self {
		self.ttls.insert(storage_key, ttl);
		self
	}

	/// Default TTL for a full storage key, based on its namespace prefix.
	pub fn ttl_for_key(&self, key: &str) -> Option<Duration> {
		let namespace = key.split(':').next().unwrap_or("");
		namespace
			.parse::<StorageKey>()
			.ok()
			.and_then(|sk| self.ttls.get(&sk).copied())
	}

	/// Config schema fields for every `ttl_<namespace>` key.
	pub fn schema_fields() -> Vec<decodify_types::Field> {
		StorageKey::all()
			.map(|storage_key| {
				decodify_types::Field::new(
					format!("ttl_{}", storage_key.as_str()),
					decodify_types::FieldType::Integer {
						min: Some(0),
						max: None,
					},
				)
			})
			.collect()
	}
}

/// Typed storage operations over a backend.
///
/// Values are JSON-encoded and stored under `<namespace>:<id>`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: StorageKey,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes = encode(data)?;
		self.backend.set_bytes(&namespace.key(id), bytes, ttl).await
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: StorageKey,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Fails with [`StorageError::NotFound`] when the key is absent.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&namespace.key(id)).await?;
		decode(&bytes)
	}

	/// Like [`retrieve`](Self::retrieve) but maps absence to `None`.
	pub async fn find<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, namespace: StorageKey, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&namespace.key(id)).await
	}

	pub async fn exists(&self, namespace: StorageKey, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&namespace.key(id)).await
	}

	/// Stores `data` unless the key already holds a value. Returns whether
	/// the value was inserted.
	pub async fn insert_if_absent<T>(
		&self,
		namespace: StorageKey,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError>
	where
		T: Serialize + DeserializeOwned + Clone + Send + Sync,
	{
		let ids = [id.to_string()];
		self.transact(namespace, &ids, |current: Vec<Option<T>>| {
			let inserted = current.first().is_some_and(Option::is_none);
			let next = if inserted {
				vec![Some(data.clone())]
			} else {
				current
			};
			Ok((next, inserted))
		})
		.await
	}

	/// Typed read-modify-write over several ids of one namespace.
	///
	/// `f` receives the current values in `ids` order and returns the new
	/// values (`None` deletes) plus an output handed back to the caller. An
	/// error from `f` aborts without writing.
	pub async fn transact<T, R, F>(
		&self,
		namespace: StorageKey,
		ids: &[String],
		f: F,
	) -> Result<R, StorageError>
	where
		T: Serialize + DeserializeOwned + Send,
		R: Send,
		F: FnOnce(Vec<Option<T>>) -> Result<(Vec<Option<T>>, R), StorageError> + Send,
	{
		let keys: Vec<String> = ids.iter().map(|id| namespace.key(id)).collect();
		let expected = keys.len();
		let mut output = None;
		let slot = &mut output;

		let update: BatchUpdate<'_> = Box::new(move |raw| {
			let current = raw
				.into_iter()
				.map(|bytes| bytes.as_deref().map(decode::<T>).transpose())
				.collect::<Result<Vec<_>, _>>()?;
			let (next, result) = f(current)?;
			if next.len() != expected {
				return Err(StorageError::Aborted(format!(
					"expected {} values, got {}",
					expected,
					next.len()
				)));
			}
			*slot = Some(result);
			next.iter()
				.map(|value| value.as_ref().map(encode).transpose())
				.collect()
		});

		self.backend.update_many(&keys, update).await?;
		output.ok_or_else(|| StorageError::Backend("batch update did not run".into()))
	}

	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_typed_round_trip_and_find() {
		let storage = service();
		storage
			.store(StorageKey::Transactions, "ethereum:0x01", &vec![1u32, 2, 3])
			.await
			.unwrap();

		let value: Vec<u32> = storage
			.retrieve(StorageKey::Transactions, "ethereum:0x01")
			.await
			.unwrap();
		assert_eq!(value, vec![1, 2, 3]);

		let missing: Option<Vec<u32>> = storage
			.find(StorageKey::Transactions, "ethereum:0x02")
			.await
			.unwrap();
		assert!(missing.is_none());
	}

	#[tokio::test]
	async fn test_insert_if_absent_keeps_existing() {
		let storage = service();
		assert!(storage
			.insert_if_absent(StorageKey::RpcNodes, "ethereum:default", &"first".to_string())
			.await
			.unwrap());
		assert!(!storage
			.insert_if_absent(StorageKey::RpcNodes, "ethereum:default", &"second".to_string())
			.await
			.unwrap());

		let value: String = storage
			.retrieve(StorageKey::RpcNodes, "ethereum:default")
			.await
			.unwrap();
		assert_eq!(value, "first");
	}

	#[tokio::test]
	async fn test_transact_writes_and_deletes() {
		let storage = service();
		storage
			.store(StorageKey::Accounts, "a", &1u32)
			.await
			.unwrap();

		let ids = vec!["a".to_string(), "b".to_string()];
		let seen = storage
			.transact(StorageKey::Accounts, &ids, |current: Vec<Option<u32>>| {
				let seen = current.clone();
				Ok((vec![None, Some(2u32)], seen))
			})
			.await
			.unwrap();

		assert_eq!(seen, vec![Some(1), None]);
		assert!(!storage.exists(StorageKey::Accounts, "a").await.unwrap());
		let b: u32 = storage.retrieve(StorageKey::Accounts, "b").await.unwrap();
		assert_eq!(b, 2);
	}

	#[tokio::test]
	async fn test_transact_abort_leaves_state() {
		let storage = service();
		storage
			.store(StorageKey::Accounts, "a", &1u32)
			.await
			.unwrap();

		let ids = vec!["a".to_string()];
		let result: Result<(), _> = storage
			.transact(StorageKey::Accounts, &ids, |_current: Vec<Option<u32>>| {
				Err(StorageError::Aborted("no".into()))
			})
			.await;
		assert!(matches!(result, Err(StorageError::Aborted(_))));

		let a: u32 = storage.retrieve(StorageKey::Accounts, "a").await.unwrap();
		assert_eq!(a, 1);
	}

	#[test]
	fn test_ttl_config_by_namespace() {
		let config: toml::Value =
			toml::from_str("ttl_decoded_events = 60\nttl_receipts = 0").unwrap();
		let ttls = TtlConfig::from_config(&config);
		assert_eq!(
			ttls.ttl_for_key("decoded_events:ethereum:0x01"),
			Some(Duration::from_secs(60))
		);
		assert_eq!(ttls.ttl_for_key("receipts:ethereum:0x01"), None);
		assert_eq!(ttls.ttl_for_key("unknown:x"), None);
	}
}
