//! Storage module for the delivery marketplace.
//!
//! This module provides the durable store the order core runs on: a
//! key-value backend with atomic multi-key batches, per-row locks with a
//! bounded wait, and scoped transactions that combine the two.

use async_trait::async_trait;
use delivery_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod lock;
pub mod transaction;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use lock::{LockManager, RowGuard};
pub use transaction::Transaction;

/// Row lock wait used when the configuration does not override it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// A unique insert found a live value under the key.
	#[error("Unique violation on key {0}")]
	UniqueViolation(String),
	/// A compare-and-swap found different bytes than the ones it read.
	#[error("Stale write on key {0}")]
	StaleWrite(String),
	/// The row lock could not be acquired within the configured wait.
	#[error("Timed out waiting for lock on {0}")]
	LockTimeout(String),
}

impl StorageError {
	/// Whether the failed operation may succeed if simply tried again.
	pub fn is_contention(&self) -> bool {
		matches!(self, StorageError::StaleWrite(_) | StorageError::LockTimeout(_))
	}
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
	/// Create the key. Fails with `UniqueViolation` if a live value exists.
	Insert {
		key: String,
		value: Vec<u8>,
		ttl: Option<Duration>,
	},
	/// Create or overwrite the key.
	Put {
		key: String,
		value: Vec<u8>,
		ttl: Option<Duration>,
	},
	/// Overwrite the key only if it still holds `expected`.
	/// Fails with `StaleWrite` otherwise, including when the key is gone.
	CompareAndSwap {
		key: String,
		expected: Vec<u8>,
		value: Vec<u8>,
		ttl: Option<Duration>,
	},
	/// Remove the key if present.
	Delete { key: String },
}

impl WriteOp {
	pub fn key(&self) -> &str {
		match self {
			WriteOp::Insert { key, .. }
			| WriteOp::Put { key, .. }
			| WriteOp::CompareAndSwap { key, .. }
			| WriteOp::Delete { key } => key,
		}
	}

	/// Value the key holds after this op, `None` for a delete.
	pub fn value(&self) -> Option<&[u8]> {
		match self {
			WriteOp::Insert { value, .. }
			| WriteOp::Put { value, .. }
			| WriteOp::CompareAndSwap { value, .. } => Some(value),
			WriteOp::Delete { .. } => None,
		}
	}

	/// Checks the precondition of this op against the current live value.
	pub(crate) fn check(&self, current: Option<&[u8]>) -> Result<(), StorageError> {
		match self {
			WriteOp::Insert { key, .. } if current.is_some() => {
				Err(StorageError::UniqueViolation(key.clone()))
			},
			WriteOp::CompareAndSwap { key, expected, .. } if current != Some(expected.as_slice()) => {
				Err(StorageError::StaleWrite(key.clone()))
			},
			_ => Ok(()),
		}
	}
}

/// Checks the preconditions of a batch in order.
///
/// Each op sees the effect of the ops queued before it on the same key, so a
/// second insert of one key fails and a second compare-and-swap must expect
/// the bytes written by the first. `current` reads the live stored value.
pub(crate) fn check_batch<'a, I, F>(ops: I, mut current: F) -> Result<(), StorageError>
where
	I: IntoIterator<Item = &'a WriteOp>,
	F: FnMut(&str) -> Result<Option<Vec<u8>>, StorageError>,
{
	let mut pending: HashMap<&'a str, Option<&'a [u8]>> = HashMap::new();
	for op in ops {
		let key = op.key();
		let stored;
		let live = match pending.get(key) {
			Some(value) => *value,
			None => {
				stored = current(key)?;
				stored.as_deref()
			},
		};
		op.check(live)?;
		pending.insert(key, op.value());
	}
	Ok(())
}

/// Trait defining the low-level interface for storage backends.
///
/// Besides plain key-value access, a backend must apply a batch of writes
/// atomically: either every op's precondition holds and all of them become
/// visible together, or none of them is applied. Preconditions are checked
/// in order, each op seeing the earlier ops of the same batch.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a live key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists live keys starting with `prefix`.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Applies all ops or none of them.
	async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage.
	/// Returns the number of entries removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns (name, factory) pairs used by the builder to select the backend
/// named in `[storage] primary`.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

pub(crate) fn storage_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

pub(crate) fn to_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// High-level storage service that provides typed operations.
///
/// Wraps a backend and the row lock table. Single-key helpers are for
/// callers that need no coordination; anything that reads a row to decide
/// a write goes through [`StorageService::begin`].
pub struct StorageService {
	backend: Arc<dyn StorageInterface>,
	locks: Arc<LockManager>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self {
			backend: Arc::from(backend),
			locks: Arc::new(LockManager::new(DEFAULT_LOCK_TIMEOUT)),
		}
	}

	/// Replaces the default row lock wait.
	pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
		self.locks = Arc::new(LockManager::new(timeout));
		self
	}

	/// The row lock table shared by all transactions of this service.
	pub fn locks(&self) -> &Arc<LockManager> {
		&self.locks
	}

	/// Starts a transaction. Nothing is written until `commit`.
	pub fn begin(&self) -> Transaction {
		Transaction::new(self.backend.clone(), self.locks.clone())
	}

	/// Stores a serializable value with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes = to_bytes(data)?;
		self.backend
			.set_bytes(&storage_key(namespace, id), bytes, ttl)
			.await
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&storage_key(namespace, id)).await?;
		from_bytes(&bytes)
	}

	/// Retrieves every live value in a namespace, ordered by key.
	pub async fn list<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<T>, StorageError> {
		let prefix = storage_key(namespace, "");
		let mut keys = self.backend.list_keys(&prefix).await?;
		keys.sort();

		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(bytes) => values.push(from_bytes(&bytes)?),
				// Expired or removed since listing.
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&storage_key(namespace, id)).await
	}

	/// Overwrites an existing value. Fails with `NotFound` if the key is absent.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		self.backend.set_bytes(&key, to_bytes(data)?, None).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&storage_key(namespace, id)).await
	}

	/// Removes expired entries from storage.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
