//! In-memory storage backend.
//!
//! Keeps values in a `HashMap` behind a read-write lock. Nothing survives a
//! restart, which makes it the backend of choice for development and tests.

use crate::{BatchUpdate, StorageError, StorageFactory, StorageInterface, StorageRegistry, TtlConfig};
use async_trait::async_trait;
use decodify_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| now >= at)
	}
}

pub struct MemoryStorage {
	store: Arc<RwLock<HashMap<String, Entry>>>,
	ttl_config: TtlConfig,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::with_ttl_config(TtlConfig::default())
	}

	pub fn with_ttl_config(ttl_config: TtlConfig) -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
			ttl_config,
		}
	}

	fn entry(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Entry {
		let ttl = ttl.or_else(|| self.ttl_config.ttl_for_key(key));
		Entry {
			value,
			expires_at: ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| Instant::now() + ttl),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store
			.get(key)
			.filter(|entry| !entry.is_expired(Instant::now()))
			.map(|entry| entry.value.clone())
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let entry = self.entry(key, value, ttl);
		let mut store = self.store.write().await;
		store.insert(key.to_string(), entry);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.get(key)
			.is_some_and(|entry| !entry.is_expired(Instant::now())))
	}

	async fn update_many<'a>(
		&'a self,
		keys: &'a [String],
		update: BatchUpdate<'a>,
	) -> Result<(), StorageError> {
		// The write guard spans read, update and write-back.
		let mut store = self.store.write().await;
		let now = Instant::now();
		let current = keys
			.iter()
			.map(|key| {
				store
					.get(key)
					.filter(|entry| !entry.is_expired(now))
					.map(|entry| entry.value.clone())
			})
			.collect();

		let next = update(current)?;
		if next.len() != keys.len() {
			return Err(StorageError::Backend(format!(
				"batch update returned {} values for {} keys",
				next.len(),
				keys.len()
			)));
		}

		for (key, value) in keys.iter().zip(next) {
			match value {
				Some(value) => {
					let entry = self.entry(key, value, None);
					store.insert(key.clone(), entry);
				},
				None => {
					store.remove(key);
				},
			}
		}
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut store = self.store.write().await;
		let now = Instant::now();
		let before = store.len();
		store.retain(|_, entry| !entry.is_expired(now));
		Ok(before - store.len())
	}
}

/// Configuration schema for MemoryStorage: only the optional TTL keys.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], TtlConfig::schema_fields()).validate(config)
	}
}

/// Creates a memory backend. Accepts the `ttl_<namespace>` keys.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::with_ttl_config(
		TtlConfig::from_config(config),
	)))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
