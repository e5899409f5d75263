//! File-based storage backend.
//!
//! Each key is one file under `storage_path`, prefixed with a fixed-size
//! header carrying its expiry. Writes go to a temporary file that is then
//! renamed over the target. Batch updates are serialized in-process by a
//! mutex and across processes by an exclusive `fs2` lock on `.lock`.
//!
//! A batch stages every new value before replacing any key. If staging
//! fails nothing is replaced; if a replacement fails the keys already
//! replaced are restored from their previous content.

use crate::{BatchUpdate, StorageError, StorageFactory, StorageInterface, StorageRegistry, TtlConfig};
use async_trait::async_trait;
use decodify_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;

const LOCK_FILE: &str = ".lock";
const LOCK_RETRY: Duration = Duration::from_millis(5);
const STAGED_EXTENSION: &str = "staged";

/// Fixed-size file header.
///
/// Layout (32 bytes):
/// - `[0..4]`: magic `DCDF`
/// - `[4..6]`: version, u16 little-endian
/// - `[6..14]`: expiry, u64 little-endian Unix seconds, 0 = never
/// - `[14..32]`: reserved
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"DCDF";
	const VERSION: u16 = 1;
	const SIZE: usize = 32;

	fn new(ttl: Option<Duration>) -> Self {
		let expires_at = match ttl {
			Some(ttl) if !ttl.is_zero() => unix_now().saturating_add(ttl.as_secs().max(1)),
			_ => 0,
		};
		Self { expires_at }
	}

	fn to_bytes(self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::VERSION.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE || &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Missing file header".into()));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}
		let mut expires = [0u8; 8];
		expires.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			expires_at: u64::from_le_bytes(expires),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && unix_now() >= self.expires_at
	}
}

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

fn backend_error(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// Header followed by `value`.
fn encode(ttl: Option<Duration>, value: &[u8]) -> Vec<u8> {
	let mut data = Vec::with_capacity(FileHeader::SIZE + value.len());
	data.extend_from_slice(&FileHeader::new(ttl).to_bytes());
	data.extend_from_slice(value);
	data
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
	match fs::remove_file(path).await {
		Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

/// One key of a batch: its file, the staged replacement (`None` deletes)
/// and the raw content it had before the batch.
struct BatchEntry {
	target: PathBuf,
	staged: Option<PathBuf>,
	previous: Option<Vec<u8>>,
}

/// Splits raw file content into payload, or `None` when expired.
fn payload(data: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError> {
	let header = FileHeader::from_bytes(&data)?;
	if header.is_expired() {
		return Ok(None);
	}
	Ok(Some(data[FileHeader::SIZE..].to_vec()))
}

pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	/// Serializes writers within this process.
	write_lock: Mutex<()>,
}

impl FileStorage {
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
			write_lock: Mutex::new(()),
		}
	}

	/// Maps a storage key to a filesystem-safe path.
	fn file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':', '\\'], "_");
		self.base_path.join(format!("{}.bin", safe_key))
	}

	/// File content including the header, `None` when there is no file.
	async fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(self.file_path(key)).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		match self.read_raw(key).await? {
			Some(data) => payload(data),
			None => Ok(None),
		}
	}

	async fn write(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)?;

		let ttl = ttl.or_else(|| self.ttl_config.ttl_for_key(key));
		let path = self.file_path(key);
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, encode(ttl, value))
			.await
			.map_err(backend_error)?;
		fs::rename(&temp_path, &path).await.map_err(backend_error)
	}

	async fn remove(&self, key: &str) -> Result<(), StorageError> {
		remove_path(&self.file_path(key)).await.map_err(backend_error)
	}

	/// Writes every new value of a batch next to its target.
	async fn stage_batch(
		&self,
		keys: &[String],
		next: Vec<Option<Vec<u8>>>,
		previous: Vec<Option<Vec<u8>>>,
	) -> Result<Vec<BatchEntry>, StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)?;

		let mut entries: Vec<BatchEntry> = Vec::with_capacity(keys.len());
		for ((key, value), previous) in keys.iter().zip(next).zip(previous) {
			let target = self.file_path(key);
			let staged = match value {
				Some(value) => {
					let staged = target.with_extension(STAGED_EXTENSION);
					let data = encode(self.ttl_config.ttl_for_key(key), &value);
					if let Err(e) = fs::write(&staged, data).await {
						discard_staged(&entries).await;
						return Err(backend_error(e));
					}
					Some(staged)
				},
				None => None,
			};
			entries.push(BatchEntry {
				target,
				staged,
				previous,
			});
		}
		Ok(entries)
	}

	/// Replaces every target with its staged value, undoing the applied
	/// part of the batch on failure.
	async fn commit_batch(&self, entries: &[BatchEntry]) -> Result<(), StorageError> {
		for (applied, entry) in entries.iter().enumerate() {
			let result = match &entry.staged {
				Some(staged) => fs::rename(staged, &entry.target).await,
				None => remove_path(&entry.target).await,
			};
			if let Err(e) = result {
				tracing::warn!(
					"Batch write to {:?} failed, restoring {} keys: {}",
					entry.target,
					applied,
					e
				);
				restore(&entries[..applied]).await;
				discard_staged(&entries[applied..]).await;
				return Err(backend_error(e));
			}
		}
		Ok(())
	}

	/// Takes the cross-process lock, polling so no runtime thread blocks.
	async fn lock_directory(&self) -> Result<std::fs::File, StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)?;
		let file = open_lock_file(&self.base_path.join(LOCK_FILE))?;
		let contended = fs2::lock_contended_error().raw_os_error();
		loop {
			match file.try_lock_exclusive() {
				Ok(()) => return Ok(file),
				Err(e) if e.raw_os_error() == contended => tokio::time::sleep(LOCK_RETRY).await,
				Err(e) => return Err(backend_error(e)),
			}
		}
	}

	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(backend_error(e)),
		};

		let mut removed = 0;
		while let Some(entry) = entries.next_entry().await.map_err(backend_error)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let expired = match fs::read(&path).await {
				Ok(data) => FileHeader::from_bytes(&data).is_ok_and(|h| h.is_expired()),
				Err(e) => {
					tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
					false
				},
			};
			if expired {
				match fs::remove_file(&path).await {
					Ok(()) => removed += 1,
					Err(e) => tracing::warn!("Failed to remove expired file {:?}: {}", path, e),
				}
			}
		}
		Ok(removed)
	}
}

async fn discard_staged(entries: &[BatchEntry]) {
	for staged in entries.iter().filter_map(|entry| entry.staged.as_ref()) {
		if let Err(e) = remove_path(staged).await {
			tracing::warn!("Failed to remove staged file {:?}: {}", staged, e);
		}
	}
}

async fn restore(entries: &[BatchEntry]) {
	for entry in entries {
		let result = match &entry.previous {
			Some(data) => fs::write(&entry.target, data).await,
			None => remove_path(&entry.target).await,
		};
		if let Err(e) = result {
			tracing::error!("Failed to restore {:?} after batch failure: {}", entry.target, e);
		}
	}
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, StorageError> {
	std::fs::OpenOptions::new()
		.create(true)
		.truncate(false)
		.write(true)
		.open(path)
		.map_err(backend_error)
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read(key).await?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write(key, &value, ttl).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.remove(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read(key).await?.is_some())
	}

	async fn update_many<'a>(
		&'a self,
		keys: &'a [String],
		update: BatchUpdate<'a>,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let lock_file = self.lock_directory().await?;

		let result = async {
			let mut previous = Vec::with_capacity(keys.len());
			let mut current = Vec::with_capacity(keys.len());
			for key in keys {
				let raw = self.read_raw(key).await?;
				current.push(match &raw {
					Some(data) => payload(data.clone())?,
					None => None,
				});
				previous.push(raw);
			}

			let next = update(current)?;
			if next.len() != keys.len() {
				return Err(StorageError::Backend(format!(
					"batch update returned {} values for {} keys",
					next.len(),
					keys.len()
				)));
			}

			let entries = self.stage_batch(keys, next, previous).await?;
			self.commit_batch(&entries).await
		}
		.await;

		if let Err(e) = FileExt::unlock(&lock_file) {
			tracing::warn!("Failed to release storage lock: {}", e);
		}
		result
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional = vec![Field::new("storage_path", FieldType::String)];
		optional.extend(TtlConfig::schema_fields());
		Schema::new(vec![], optional).validate(config)
	}
}

/// Creates a file backend.
///
/// Configuration:
/// - `storage_path`: base directory (default `./data/storage`)
/// - `ttl_<namespace>`: default TTL in seconds per namespace (default 0, no expiry)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
