//! In-memory storage backend implementation.
//!
//! Useful for tests and single-process development. Data does not survive a
//! restart. Expiry is checked on every read and swept by `cleanup_expired`.

use crate::{check_batch, StorageError, StorageFactory, StorageInterface, StorageRegistry, WriteOp};
use async_trait::async_trait;
use delivery_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
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
	fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
		Self {
			value,
			expires_at: ttl
				.filter(|t| !t.is_zero())
				.and_then(|t| Instant::now().checked_add(t)),
		}
	}

	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.is_none_or(|at| now < at)
	}
}

/// In-memory storage implementation.
///
/// A single read-write lock guards the map; a batch checks every
/// precondition and applies every op under one write guard.
pub struct MemoryStorage {
	store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
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
			.filter(|entry| entry.is_live(Instant::now()))
			.map(|entry| entry.value.clone())
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), Entry::new(value, ttl));
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
			.is_some_and(|entry| entry.is_live(Instant::now())))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let now = Instant::now();
		let store = self.store.read().await;
		Ok(store
			.iter()
			.filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
			.map(|(key, _)| key.clone())
			.collect())
	}

	async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
		let now = Instant::now();
		let mut store = self.store.write().await;

		check_batch(&ops, |key| {
			Ok(store
				.get(key)
				.filter(|entry| entry.is_live(now))
				.map(|entry| entry.value.clone()))
		})?;

		for op in ops {
			match op {
				WriteOp::Insert { key, value, ttl }
				| WriteOp::Put { key, value, ttl }
				| WriteOp::CompareAndSwap {
					key, value, ttl, ..
				} => {
					store.insert(key, Entry::new(value, ttl));
				},
				WriteOp::Delete { key } => {
					store.remove(&key);
				},
			}
		}
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let now = Instant::now();
		let mut store = self.store.write().await;
		let before = store.len();
		store.retain(|_, entry| entry.is_live(now));
		Ok(before - store.len())
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No settings
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "test_key";
		let value = b"test_value".to_vec();
		storage.set_bytes(key, value.clone(), None).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_ttl_expiry() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("idempotency:a", b"x".to_vec(), Some(Duration::from_millis(30)))
			.await
			.unwrap();
		storage
			.set_bytes("orders:1", b"y".to_vec(), None)
			.await
			.unwrap();

		assert!(storage.exists("idempotency:a").await.unwrap());
		tokio::time::sleep(Duration::from_millis(60)).await;

		assert!(!storage.exists("idempotency:a").await.unwrap());
		assert!(storage.list_keys("idempotency:").await.unwrap().is_empty());
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert!(storage.exists("orders:1").await.unwrap());
	}

	#[tokio::test]
	async fn test_insert_over_expired_value() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("k", b"old".to_vec(), Some(Duration::from_millis(10)))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(30)).await;

		storage
			.apply_batch(vec![WriteOp::Insert {
				key: "k".into(),
				value: b"new".to_vec(),
				ttl: None,
			}])
			.await
			.unwrap();
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"new".to_vec());
	}

	#[tokio::test]
	async fn test_rejected_batch_leaves_store_untouched() {
		let storage = MemoryStorage::new();
		storage.set_bytes("a", b"1".to_vec(), None).await.unwrap();

		let result = storage
			.apply_batch(vec![
				WriteOp::Delete { key: "a".into() },
				WriteOp::CompareAndSwap {
					key: "b".into(),
					expected: b"1".to_vec(),
					value: b"2".to_vec(),
					ttl: None,
				},
			])
			.await;

		assert!(matches!(result, Err(StorageError::StaleWrite(k)) if k == "b"));
		assert!(storage.exists("a").await.unwrap());
	}

	#[tokio::test]
	async fn test_batch_checks_ops_in_order() {
		let storage = MemoryStorage::new();
		let insert = |value: &[u8]| WriteOp::Insert {
			key: "k".into(),
			value: value.to_vec(),
			ttl: None,
		};

		let result = storage.apply_batch(vec![insert(b"1"), insert(b"2")]).await;
		assert!(matches!(result, Err(StorageError::UniqueViolation(k)) if k == "k"));
		assert!(!storage.exists("k").await.unwrap());

		storage.set_bytes("k", b"1".to_vec(), None).await.unwrap();
		let swap = |expected: &[u8], value: &[u8]| WriteOp::CompareAndSwap {
			key: "k".into(),
			expected: expected.to_vec(),
			value: value.to_vec(),
			ttl: None,
		};
		let result = storage
			.apply_batch(vec![swap(b"1", b"2"), swap(b"1", b"3")])
			.await;
		assert!(matches!(result, Err(StorageError::StaleWrite(_))));

		storage
			.apply_batch(vec![swap(b"1", b"2"), swap(b"2", b"3")])
			.await
			.unwrap();
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"3".to_vec());

		storage
			.apply_batch(vec![WriteOp::Delete { key: "k".into() }, insert(b"4")])
			.await
			.unwrap();
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"4".to_vec());
	}

	#[tokio::test]
	async fn test_unbounded_ttl_never_expires() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("k", b"v".to_vec(), Some(Duration::MAX))
			.await
			.unwrap();
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
		assert!(storage.exists("k").await.unwrap());
	}
}
