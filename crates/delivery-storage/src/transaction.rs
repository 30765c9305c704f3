//! Scoped storage transactions.
//!
//! A [`Transaction`] collects writes and row locks. Rows read through
//! [`Transaction::retrieve_for_update`] stay locked until the transaction
//! ends and their bytes are remembered, so a later [`Transaction::update`]
//! becomes a compare-and-swap against exactly what was read. Nothing reaches
//! the backend until [`Transaction::commit`]; dropping the transaction on any
//! other path discards the writes and releases the locks.

use crate::{from_bytes, storage_key, to_bytes, LockManager, RowGuard, StorageError, StorageInterface, WriteOp};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Transaction {
	backend: Arc<dyn StorageInterface>,
	locks: Arc<LockManager>,
	guards: HashMap<String, RowGuard>,
	read_set: HashMap<String, Vec<u8>>,
	writes: Vec<WriteOp>,
	finished: bool,
}

impl Transaction {
	pub(crate) fn new(backend: Arc<dyn StorageInterface>, locks: Arc<LockManager>) -> Self {
		Self {
			backend,
			locks,
			guards: HashMap::new(),
			read_set: HashMap::new(),
			writes: Vec::new(),
			finished: false,
		}
	}

	/// Locks a row for the rest of the transaction using the default wait.
	///
	/// Locking a row this transaction already holds is a no-op.
	pub async fn lock(&mut self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let timeout = self.locks.timeout();
		self.lock_with_timeout(namespace, id, timeout).await
	}

	/// Locks a row for the rest of the transaction, waiting at most `timeout`.
	pub async fn lock_with_timeout(
		&mut self,
		namespace: &str,
		id: &str,
		timeout: Duration,
	) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		if self.guards.contains_key(&key) {
			return Ok(());
		}
		let guard = self.locks.acquire_with_timeout(&key, timeout).await?;
		self.guards.insert(key, guard);
		Ok(())
	}

	/// Locks the row and reads it. A later `update` of the same row only
	/// commits if the stored bytes are still the ones read here.
	pub async fn retrieve_for_update<T: DeserializeOwned>(
		&mut self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		self.lock(namespace, id).await?;
		let key = storage_key(namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		let value = from_bytes(&bytes)?;
		self.read_set.insert(key, bytes);
		Ok(value)
	}

	/// Reads a row without locking it.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&storage_key(namespace, id)).await?;
		from_bytes(&bytes)
	}

	/// Queues a unique insert. Commit fails with `UniqueViolation` if the
	/// key holds a live value by then.
	pub fn insert<T: Serialize>(
		&mut self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.writes.push(WriteOp::Insert {
			key: storage_key(namespace, id),
			value: to_bytes(data)?,
			ttl,
		});
		Ok(())
	}

	/// Queues an overwrite of a row.
	///
	/// Rows read with `retrieve_for_update` are written with a
	/// compare-and-swap; other rows are overwritten unconditionally. A row
	/// already written in this transaction keeps its first write's
	/// precondition and takes the new value.
	pub fn update<T: Serialize>(
		&mut self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		let value = to_bytes(data)?;
		if let Some(pending) = self.writes.iter_mut().rev().find(|op| op.key() == key) {
			let replacement = match &mut *pending {
				WriteOp::Insert { value: queued, .. }
				| WriteOp::Put { value: queued, .. }
				| WriteOp::CompareAndSwap { value: queued, .. } => {
					*queued = value;
					None
				},
				WriteOp::Delete { .. } => Some(WriteOp::Put {
					key,
					value,
					ttl: None,
				}),
			};
			if let Some(op) = replacement {
				*pending = op;
			}
			return Ok(());
		}
		let op = match self.read_set.get(&key) {
			Some(expected) => WriteOp::CompareAndSwap {
				key,
				expected: expected.clone(),
				value,
				ttl: None,
			},
			None => WriteOp::Put {
				key,
				value,
				ttl: None,
			},
		};
		self.writes.push(op);
		Ok(())
	}

	pub fn delete(&mut self, namespace: &str, id: &str) {
		self.writes.push(WriteOp::Delete {
			key: storage_key(namespace, id),
		});
	}

	/// Number of queued writes.
	pub fn pending_writes(&self) -> usize {
		self.writes.len()
	}

	/// Applies all queued writes atomically, then releases the row locks.
	pub async fn commit(mut self) -> Result<(), StorageError> {
		self.finished = true;
		let writes = std::mem::take(&mut self.writes);
		if writes.is_empty() {
			return Ok(());
		}
		self.backend.apply_batch(writes).await
	}
}

impl Drop for Transaction {
	fn drop(&mut self) {
		if !self.finished && !self.writes.is_empty() {
			tracing::debug!(
				discarded = self.writes.len(),
				locks = self.guards.len(),
				"Transaction rolled back"
			);
		}
	}
}
