//! Per-key exclusive locks with a bounded wait.
//!
//! Each storage key gets its own async mutex, created on first use. Locks on
//! different keys never contend. Entries nobody holds or waits on are pruned
//! periodically by the engine.

use crate::StorageError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive hold on one key. Released on drop.
#[derive(Debug)]
pub struct RowGuard {
	key: String,
	_guard: OwnedMutexGuard<()>,
}

impl RowGuard {
	pub fn key(&self) -> &str {
		&self.key
	}
}

/// Table of per-key locks.
pub struct LockManager {
	locks: DashMap<String, Arc<Mutex<()>>>,
	timeout: Duration,
}

impl LockManager {
	pub fn new(timeout: Duration) -> Self {
		Self {
			locks: DashMap::new(),
			timeout,
		}
	}

	/// Default wait applied by [`LockManager::acquire`].
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Acquires the lock on `key`, waiting at most the default timeout.
	pub async fn acquire(&self, key: &str) -> Result<RowGuard, StorageError> {
		self.acquire_with_timeout(key, self.timeout).await
	}

	/// Acquires the lock on `key`, waiting at most `timeout`.
	pub async fn acquire_with_timeout(
		&self,
		key: &str,
		timeout: Duration,
	) -> Result<RowGuard, StorageError> {
		// The map shard guard is released before awaiting.
		let mutex = self
			.locks
			.entry(key.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();

		match tokio::time::timeout(timeout, mutex.lock_owned()).await {
			Ok(guard) => Ok(RowGuard {
				key: key.to_string(),
				_guard: guard,
			}),
			Err(_) => {
				tracing::debug!(key = %key, wait_ms = timeout.as_millis() as u64, "Lock wait exceeded");
				Err(StorageError::LockTimeout(key.to_string()))
			},
		}
	}

	/// Drops entries that are neither held nor awaited. Returns how many were removed.
	pub fn prune(&self) -> usize {
		let before = self.locks.len();
		self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
		before.saturating_sub(self.locks.len())
	}

	/// Number of keys currently tracked.
	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}
