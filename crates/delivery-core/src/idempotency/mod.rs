//! Request deduplication by client-supplied idempotency key.
//!
//! The first request under a key runs its operation and stores the response
//! in the same transaction as the operation's own writes. Later requests with
//! the same key and the same fingerprint get that response back without
//! running anything; a different fingerprint under the same key is rejected.
//! Concurrent requests with one key are serialized on a row lock in the
//! idempotency namespace.

use delivery_config::IdempotencyConfig;
use delivery_storage::{StorageError, StorageService, Transaction};
use delivery_types::{current_timestamp, truncate_id, StorageKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Sha3_256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum IdempotencyError {
	#[error("Idempotency key is required")]
	KeyRequired,
	#[error("Idempotency key was already used with a different request")]
	KeyReuse,
	#[error("Timed out waiting for a concurrent request with the same idempotency key")]
	Timeout,
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Stored outcome of a completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
	pub key_hash: String,
	/// Fingerprint of the caller and canonical request body.
	pub request_hash: String,
	pub response_snapshot: Value,
	pub created_at: u64,
}

/// A response and whether it was served from a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotentOutcome<T> {
	pub value: T,
	pub replayed: bool,
}

impl<T> IdempotentOutcome<T> {
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> IdempotentOutcome<U> {
		IdempotentOutcome {
			value: f(self.value),
			replayed: self.replayed,
		}
	}
}

/// Hex SHA3-256 of the raw key. Keys are never stored in the clear.
pub fn hash_key(key: &str) -> String {
	hex::encode(Sha3_256::digest(key.as_bytes()))
}

/// Fingerprint of a request: the actor plus the body with object keys sorted.
pub fn request_fingerprint(actor_id: &str, request: &Value) -> String {
	let mut hasher = Sha3_256::new();
	hasher.update(actor_id.as_bytes());
	hasher.update([0u8]);
	hasher.update(canonicalize(request).to_string().as_bytes());
	hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<_> = map.iter().collect();
			entries.sort_by(|a, b| a.0.cmp(b.0));
			Value::Object(
				entries
					.into_iter()
					.map(|(key, value)| (key.clone(), canonicalize(value)))
					.collect(),
			)
		},
		Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
		other => other.clone(),
	}
}

pub struct IdempotencyLayer {
	storage: Arc<StorageService>,
	retention: Duration,
	in_flight_wait: Duration,
	poll_interval: Duration,
}

impl IdempotencyLayer {
	pub fn new(storage: Arc<StorageService>, config: &IdempotencyConfig) -> Self {
		Self {
			storage,
			retention: config.retention(),
			in_flight_wait: config.in_flight_wait(),
			poll_interval: config.poll_interval(),
		}
	}

	/// Overrides how long records are kept.
	pub fn with_retention(mut self, retention: Duration) -> Self {
		self.retention = retention;
		self
	}

	/// Runs `operation` at most once per key.
	///
	/// The operation receives a transaction already holding the key's lock
	/// and returns it with its own writes queued; the record is added to the
	/// same transaction before commit. If the operation fails nothing is
	/// recorded and the key stays free.
	pub async fn guard<T, E, F, Fut>(
		&self,
		key: Option<&str>,
		actor_id: &str,
		request: &Value,
		operation: F,
	) -> Result<IdempotentOutcome<T>, E>
	where
		T: Serialize + DeserializeOwned,
		E: From<IdempotencyError>,
		F: FnOnce(Transaction) -> Fut,
		Fut: Future<Output = Result<(Transaction, T), E>>,
	{
		let key = key
			.map(str::trim)
			.filter(|key| !key.is_empty())
			.ok_or(IdempotencyError::KeyRequired)?;
		let key_hash = hash_key(key);
		let request_hash = request_fingerprint(actor_id, request);
		let namespace = StorageKey::Idempotency.as_str();

		let mut tx = self.storage.begin();
		tx.lock_with_timeout(namespace, &key_hash, self.in_flight_wait)
			.await
			.map_err(|e| match e {
				StorageError::LockTimeout(_) => IdempotencyError::Timeout,
				other => IdempotencyError::Storage(other),
			})?;

		if let Some(record) = self.lookup(&key_hash).await? {
			tracing::debug!(key = %truncate_id(&key_hash), "Replaying stored response");
			return Ok(Self::replay(record, &request_hash)?);
		}

		let (mut tx, value) = operation(tx).await?;

		let record = IdempotencyRecord {
			key_hash: key_hash.clone(),
			request_hash: request_hash.clone(),
			response_snapshot: serde_json::to_value(&value)
				.map_err(|e| IdempotencyError::Storage(StorageError::Serialization(e.to_string())))?,
			created_at: current_timestamp(),
		};
		tx.insert(namespace, &key_hash, &record, Some(self.retention))
			.map_err(IdempotencyError::Storage)?;

		let error = match tx.commit().await {
			Ok(()) => {
				return Ok(IdempotentOutcome {
					value,
					replayed: false,
				})
			},
			Err(e) => e,
		};

		// Another instance sharing the backend may have committed the same key
		// first. Its writes fail ours with either the record insert or a stale
		// row the operation also touched, whichever is checked first.
		if let Some(record) = self.lookup(&key_hash).await? {
			tracing::debug!(key = %truncate_id(&key_hash), "Lost idempotency race, replaying winner");
			return Ok(Self::replay(record, &request_hash)?);
		}
		match error {
			StorageError::UniqueViolation(violated) if violated.ends_with(&key_hash) => {
				tracing::debug!(key = %truncate_id(&key_hash), "Lost idempotency race, waiting for winner");
				Ok(self.await_record(&key_hash, &request_hash).await?)
			},
			other => Err(IdempotencyError::Storage(other).into()),
		}
	}

	/// Live record for a hashed key, if any.
	pub async fn lookup(&self, key_hash: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
		match self
			.storage
			.retrieve(StorageKey::Idempotency.as_str(), key_hash)
			.await
		{
			Ok(record) => Ok(Some(record)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn await_record<T: DeserializeOwned>(
		&self,
		key_hash: &str,
		request_hash: &str,
	) -> Result<IdempotentOutcome<T>, IdempotencyError> {
		let deadline = Instant::now() + self.in_flight_wait;
		loop {
			if let Some(record) = self.lookup(key_hash).await? {
				return Self::replay(record, request_hash);
			}
			if Instant::now() >= deadline {
				return Err(IdempotencyError::Timeout);
			}
			tokio::time::sleep(self.poll_interval).await;
		}
	}

	fn replay<T: DeserializeOwned>(
		record: IdempotencyRecord,
		request_hash: &str,
	) -> Result<IdempotentOutcome<T>, IdempotencyError> {
		if record.request_hash != request_hash {
			return Err(IdempotencyError::KeyReuse);
		}
		let value = serde_json::from_value(record.response_snapshot)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;
		Ok(IdempotentOutcome {
			value,
			replayed: true,
		})
	}
}
