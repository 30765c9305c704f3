//! File-based storage backend.
//!
//! Each key is one file holding a fixed header followed by the value. Batches
//! are committed through a write-ahead journal under an exclusive lock on the
//! storage directory, so several processes can share one directory and a
//! crash mid-commit is repaired on the next open.

use crate::{check_batch, StorageError, StorageFactory, StorageInterface, StorageRegistry, WriteOp};
use async_trait::async_trait;
use delivery_types::{
	current_timestamp, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey,
	ValidationError,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

const JOURNAL_FILE: &str = "journal.json";
const JOURNAL_TMP_FILE: &str = "journal.tmp";
const LOCK_FILE: &str = ".lock";

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size record header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "MDLV"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"MDLV";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			current_timestamp().saturating_add(ttl.as_secs().max(1))
		};
		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized record format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && current_timestamp() >= self.expires_at
	}
}

/// Default TTLs per namespace, from `ttl_<namespace>` settings.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();

		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(ttl_value) = table
					.get(&config_key)
					.and_then(|v| v.as_integer())
					.map(|v| v as u64)
				{
					ttls.insert(storage_key, Duration::from_secs(ttl_value));
				}
			}
		}

		Self { ttls }
	}

	/// TTL for a key based on its namespace prefix. Zero means no expiry.
	fn ttl_for_key(&self, key: &str) -> Duration {
		key.split(':')
			.next()
			.and_then(|namespace| namespace.parse::<StorageKey>().ok())
			.and_then(|sk| self.ttls.get(&sk).copied())
			.unwrap_or(Duration::ZERO)
	}
}

/// One step of a committed batch: the full file image to write, or `None`
/// to remove the file.
#[derive(Debug, Serialize, Deserialize)]
struct JournalOp {
	key: String,
	record: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
	ops: Vec<JournalOp>,
}

fn io_error(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// Key to file name. Hex keeps arbitrary keys filesystem-safe and reversible.
fn file_path(base: &Path, key: &str) -> PathBuf {
	base.join(format!("{}.bin", hex::encode(key)))
}

fn key_from_path(path: &Path) -> Option<String> {
	if path.extension()? != "bin" {
		return None;
	}
	let stem = path.file_stem()?.to_str()?;
	String::from_utf8(hex::decode(stem).ok()?).ok()
}

fn encode_record(value: &[u8], ttl: Duration) -> Vec<u8> {
	let mut data = Vec::with_capacity(FileHeader::SIZE + value.len());
	data.extend_from_slice(&FileHeader::new(ttl).serialize());
	data.extend_from_slice(value);
	data
}

/// Returns the value of a record, or `None` if it has expired.
fn decode_record(data: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
	let header = FileHeader::deserialize(data)?;
	if header.is_expired() {
		return Ok(None);
	}
	Ok(Some(data[FileHeader::SIZE..].to_vec()))
}

fn read_live(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
	match std::fs::read(path) {
		Ok(data) => decode_record(&data),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(io_error(e)),
	}
}

/// Writes to a sibling temp file, syncs it and renames it into place.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
	let temp_path = path.with_extension("tmp");
	let mut file = std::fs::File::create(&temp_path).map_err(io_error)?;
	file.write_all(data).map_err(io_error)?;
	file.sync_all().map_err(io_error)?;
	std::fs::rename(&temp_path, path).map_err(io_error)
}

fn replay(base: &Path, journal: &Journal) -> Result<(), StorageError> {
	for op in &journal.ops {
		let path = file_path(base, &op.key);
		match &op.record {
			Some(record) => {
				let data = hex::decode(record).map_err(|e| StorageError::Backend(e.to_string()))?;
				write_atomic(&path, &data)?;
			},
			None => match std::fs::remove_file(&path) {
				Ok(()) => {},
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
				Err(e) => return Err(io_error(e)),
			},
		}
	}
	Ok(())
}

/// Holds the directory-wide lock for the lifetime of the value.
fn lock_directory(base: &Path) -> Result<std::fs::File, StorageError> {
	let lock = OpenOptions::new()
		.create(true)
		.truncate(false)
		.write(true)
		.open(base.join(LOCK_FILE))
		.map_err(io_error)?;
	lock.lock_exclusive().map_err(io_error)?;
	Ok(lock)
}

/// Checks every precondition, journals the batch, applies it and clears the
/// journal. Runs on a blocking thread.
fn commit_blocking(base: &Path, ops: Vec<(WriteOp, Duration)>) -> Result<(), StorageError> {
	let _lock = lock_directory(base)?;

	check_batch(ops.iter().map(|(op, _)| op), |key| {
		read_live(&file_path(base, key))
	})?;

	let journal = Journal {
		ops: ops
			.into_iter()
			.map(|(op, ttl)| match op {
				WriteOp::Insert { key, value, .. }
				| WriteOp::Put { key, value, .. }
				| WriteOp::CompareAndSwap { key, value, .. } => JournalOp {
					key,
					record: Some(hex::encode(encode_record(&value, ttl))),
				},
				WriteOp::Delete { key } => JournalOp { key, record: None },
			})
			.collect(),
	};

	let journal_bytes =
		serde_json::to_vec(&journal).map_err(|e| StorageError::Serialization(e.to_string()))?;
	// The rename inside write_atomic is the commit point.
	write_atomic(&base.join(JOURNAL_FILE), &journal_bytes)?;

	replay(base, &journal)?;
	std::fs::remove_file(base.join(JOURNAL_FILE)).map_err(io_error)
}

/// Finishes a batch interrupted after its commit point and discards one
/// interrupted before it.
fn recover(base: &Path) -> Result<(), StorageError> {
	let _lock = lock_directory(base)?;

	let tmp = base.join(JOURNAL_TMP_FILE);
	if tmp.exists() {
		std::fs::remove_file(&tmp).map_err(io_error)?;
	}

	let journal_path = base.join(JOURNAL_FILE);
	if !journal_path.exists() {
		return Ok(());
	}
	let data = std::fs::read(&journal_path).map_err(io_error)?;
	let journal: Journal =
		serde_json::from_slice(&data).map_err(|e| StorageError::Serialization(e.to_string()))?;
	replay(base, &journal)?;
	std::fs::remove_file(&journal_path).map_err(io_error)?;
	tracing::info!(ops = journal.ops.len(), path = ?base, "Replayed storage journal");
	Ok(())
}

fn cleanup_blocking(base: &Path) -> Result<usize, StorageError> {
	let _lock = lock_directory(base)?;
	let mut removed = 0;

	for entry in std::fs::read_dir(base).map_err(io_error)? {
		let path = entry.map_err(io_error)?.path();
		if key_from_path(&path).is_none() {
			continue;
		}
		let data = match std::fs::read(&path) {
			Ok(data) => data,
			Err(e) => {
				tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
				continue;
			},
		};
		match FileHeader::deserialize(&data) {
			Ok(header) if header.is_expired() => {
				if let Err(e) = std::fs::remove_file(&path) {
					tracing::warn!("Failed to remove expired file {:?}: {}", path, e);
				} else {
					removed += 1;
				}
			},
			Ok(_) => {},
			Err(e) => tracing::debug!("Skipping file {:?}: {}", path, e),
		}
	}
	Ok(removed)
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	/// Serializes commits from this process before taking the directory lock.
	commit_lock: Mutex<()>,
}

impl FileStorage {
	/// Opens the storage directory, creating it if needed and replaying any
	/// journal left by an interrupted commit.
	pub fn open(base_path: PathBuf, ttl_config: TtlConfig) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(io_error)?;
		recover(&base_path)?;
		Ok(Self {
			base_path,
			ttl_config,
			commit_lock: Mutex::new(()),
		})
	}

	async fn run_blocking<T, F>(&self, f: F) -> Result<T, StorageError>
	where
		F: FnOnce(&Path) -> Result<T, StorageError> + Send + 'static,
		T: Send + 'static,
	{
		let _guard = self.commit_lock.lock().await;
		let base = self.base_path.clone();
		tokio::task::spawn_blocking(move || f(&base))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let data = match fs::read(file_path(&self.base_path, key)).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(io_error(e)),
		};
		decode_record(&data)?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.apply_batch(vec![WriteOp::Put {
			key: key.to_string(),
			value,
			ttl,
		}])
		.await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.apply_batch(vec![WriteOp::Delete {
			key: key.to_string(),
		}])
		.await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.get_bytes(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		let mut entries = fs::read_dir(&self.base_path).await.map_err(io_error)?;

		while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
			let Some(key) = key_from_path(&entry.path()) else {
				continue;
			};
			if !key.starts_with(prefix) {
				continue;
			}
			match self.get_bytes(&key).await {
				Ok(_) => keys.push(key),
				Err(StorageError::NotFound) => {},
				Err(e) => return Err(e),
			}
		}
		Ok(keys)
	}

	async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
		if ops.is_empty() {
			return Ok(());
		}
		let resolved: Vec<(WriteOp, Duration)> = ops
			.into_iter()
			.map(|op| {
				let ttl = match &op {
					WriteOp::Insert { ttl, .. }
					| WriteOp::Put { ttl, .. }
					| WriteOp::CompareAndSwap { ttl, .. } => {
						ttl.unwrap_or_else(|| self.ttl_config.ttl_for_key(op.key()))
					},
					WriteOp::Delete { .. } => Duration::ZERO,
				};
				(op, ttl)
			})
			.collect();

		self.run_blocking(move |base| commit_blocking(base, resolved))
			.await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.run_blocking(cleanup_blocking).await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)
			.with_validator(|v| match v.as_str() {
				Some(path) if path.trim().is_empty() => {
					Err("storage_path must not be empty".to_string())
				},
				_ => Ok(()),
			})];

		for storage_key in StorageKey::all() {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}

		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
/// - `ttl_orders`, `ttl_stores`, `ttl_products`, `ttl_idempotency`: default TTL in seconds
///   for writes that do not carry one (default: 0, no expiry)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage")
		.to_string();

	Ok(Box::new(FileStorage::open(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
