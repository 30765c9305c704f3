//! Exclusive read-decide-write on a single order row.
//!
//! Every status change runs as one transaction: lock the row, read it, let
//! the caller decide the new state, write it back with a compare-and-swap
//! and commit. Lock timeouts and stale writes are retried with exponential
//! backoff; business rejections are returned immediately.

use crate::state::{OrderStateMachine, TransitionError};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use delivery_config::AssignmentConfig;
use delivery_storage::{StorageError, StorageService};
use delivery_types::{current_timestamp, truncate_id, Actor, Order, OrderStatus, StorageKey};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Why an otherwise well-formed request lost against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
	/// Another driver already holds the order.
	AlreadyAssigned,
	/// The order has not been confirmed yet.
	NotConfirmed,
	Cancelled,
	/// The row stayed contended through every attempt.
	Contended,
}

impl ConflictReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			ConflictReason::AlreadyAssigned => "ALREADY_ASSIGNED",
			ConflictReason::NotConfirmed => "NOT_CONFIRMED",
			ConflictReason::Cancelled => "CANCELLED",
			ConflictReason::Contended => "CONTENDED",
		}
	}
}

impl fmt::Display for ConflictReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error)]
pub enum AssignmentError {
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Conflict: {0}")]
	Conflict(ConflictReason),
	#[error(transparent)]
	Transition(#[from] TransitionError),
	#[error("Storage error: {0}")]
	Storage(StorageError),
}

/// An order row before and after a committed change.
#[derive(Debug, Clone)]
pub struct Committed {
	pub before: Order,
	pub after: Order,
}

/// Serializes writers on order rows.
pub struct AssignmentEngine {
	storage: Arc<StorageService>,
	max_attempts: u32,
	base_backoff: Duration,
	backoff_multiplier: f64,
}

impl AssignmentEngine {
	pub fn new(storage: Arc<StorageService>, config: &AssignmentConfig) -> Self {
		Self {
			storage,
			max_attempts: config.max_attempts.max(1),
			base_backoff: config.base_backoff(),
			backoff_multiplier: config.backoff_multiplier,
		}
	}

	/// Runs `decide` against the current row under its lock and commits the
	/// order it returns.
	///
	/// `decide` may run more than once if an attempt loses to contention, so
	/// it must not have side effects. Running out of attempts yields
	/// `Conflict(Contended)`.
	pub async fn run_exclusive<F>(&self, order_id: &str, decide: F) -> Result<Committed, AssignmentError>
	where
		F: Fn(&Order) -> Result<Order, AssignmentError>,
	{
		let mut backoff = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.base_backoff)
			.with_multiplier(self.backoff_multiplier)
			.with_randomization_factor(0.0)
			.with_max_interval(Duration::from_secs(60))
			.with_max_elapsed_time(None)
			.build();

		for attempt in 1..=self.max_attempts {
			let error = match self.attempt(order_id, &decide).await {
				Ok(committed) => return Ok(committed),
				Err(AssignmentError::Storage(e)) if e.is_contention() => e,
				Err(e) => return Err(e),
			};

			if attempt == self.max_attempts {
				tracing::warn!(
					order_id = %truncate_id(order_id),
					attempts = attempt,
					error = %error,
					"Giving up on contended order"
				);
				break;
			}
			let delay = backoff.next_backoff().unwrap_or(self.base_backoff);
			tracing::debug!(
				order_id = %truncate_id(order_id),
				attempt,
				delay_ms = delay.as_millis() as u64,
				error = %error,
				"Retrying contended order"
			);
			tokio::time::sleep(delay).await;
		}

		Err(AssignmentError::Conflict(ConflictReason::Contended))
	}

	async fn attempt<F>(&self, order_id: &str, decide: &F) -> Result<Committed, AssignmentError>
	where
		F: Fn(&Order) -> Result<Order, AssignmentError>,
	{
		let namespace = StorageKey::Orders.as_str();
		let mut tx = self.storage.begin();
		let before: Order = tx
			.retrieve_for_update(namespace, order_id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => AssignmentError::NotFound(order_id.to_string()),
				other => AssignmentError::Storage(other),
			})?;

		// Rejections drop the transaction and release the row.
		let after = decide(&before)?;

		tx.update(namespace, order_id, &after)
			.map_err(AssignmentError::Storage)?;
		tx.commit().await.map_err(AssignmentError::Storage)?;
		Ok(Committed { before, after })
	}

	/// Claims a confirmed order for `driver`. Exactly one concurrent caller
	/// wins; the rest observe the winner's write and get a conflict.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), driver_id = %driver.id))]
	pub async fn attempt_accept(&self, order_id: &str, driver: &Actor) -> Result<Committed, AssignmentError> {
		let committed = self
			.run_exclusive(order_id, |order| {
				match (order.status, order.driver_id.is_some()) {
					(OrderStatus::Confirmed, false) => {},
					(OrderStatus::Cancelled, _) => {
						return Err(AssignmentError::Conflict(ConflictReason::Cancelled))
					},
					(_, true) => {
						return Err(AssignmentError::Conflict(ConflictReason::AlreadyAssigned))
					},
					_ => return Err(AssignmentError::Conflict(ConflictReason::NotConfirmed)),
				}
				Ok(OrderStateMachine::apply(
					order,
					driver,
					OrderStatus::Assigned,
					current_timestamp(),
				)?)
			})
			.await?;

		tracing::info!("Order assigned");
		Ok(committed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use delivery_storage::implementations::memory::MemoryStorage;
	use rust_decimal::Decimal;

	fn storage(lock_timeout_ms: u64) -> Arc<StorageService> {
		Arc::new(
			StorageService::new(Box::new(MemoryStorage::new()))
				.with_lock_timeout(Duration::from_millis(lock_timeout_ms)),
		)
	}

	fn config(max_attempts: u32) -> AssignmentConfig {
		AssignmentConfig {
			max_attempts,
			base_backoff_ms: 5,
			backoff_multiplier: 4.0,
			lock_timeout_ms: 50,
		}
	}

	async fn seed(storage: &StorageService, id: &str, status: OrderStatus, driver: Option<&str>) {
		let order = Order {
			id: id.into(),
			customer_id: "c1".into(),
			driver_id: driver.map(String::from),
			status,
			items: vec![],
			total_price: Decimal::new(1250, 2),
			version: 1,
			created_at: 1,
			updated_at: 1,
			assigned_at: None,
		};
		storage
			.store(StorageKey::Orders.as_str(), id, &order)
			.await
			.unwrap();
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_accept_has_single_winner() {
		let storage = storage(500);
		seed(&storage, "o1", OrderStatus::Confirmed, None).await;
		let engine = Arc::new(AssignmentEngine::new(storage.clone(), &config(3)));

		let mut handles = Vec::new();
		for i in 0..16 {
			let engine = engine.clone();
			handles.push(tokio::spawn(async move {
				let driver = Actor::driver(format!("d{}", i));
				engine.attempt_accept("o1", &driver).await
			}));
		}

		let mut winners = Vec::new();
		for handle in handles {
			match handle.await.unwrap() {
				Ok(committed) => winners.push(committed.after),
				Err(AssignmentError::Conflict(ConflictReason::AlreadyAssigned)) => {},
				Err(e) => panic!("unexpected error: {}", e),
			}
		}
		assert_eq!(winners.len(), 1);

		let stored: Order = storage.retrieve(StorageKey::Orders.as_str(), "o1").await.unwrap();
		assert_eq!(stored.status, OrderStatus::Assigned);
		assert_eq!(stored.driver_id, winners[0].driver_id);
		assert_eq!(stored.version, 2);
	}

	#[tokio::test]
	async fn test_accept_conflict_reasons() {
		let storage = storage(50);
		seed(&storage, "pending", OrderStatus::Pending, None).await;
		seed(&storage, "cancelled", OrderStatus::Cancelled, None).await;
		seed(&storage, "taken", OrderStatus::PickedUp, Some("d1")).await;
		let engine = AssignmentEngine::new(storage, &config(3));
		let driver = Actor::driver("d2");

		for (id, reason) in [
			("pending", ConflictReason::NotConfirmed),
			("cancelled", ConflictReason::Cancelled),
			("taken", ConflictReason::AlreadyAssigned),
		] {
			match engine.attempt_accept(id, &driver).await {
				Err(AssignmentError::Conflict(got)) => assert_eq!(got, reason, "{}", id),
				other => panic!("{}: unexpected {:?}", id, other.map(|c| c.after)),
			}
		}
		assert!(matches!(
			engine.attempt_accept("missing", &driver).await,
			Err(AssignmentError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_exhausted_attempts_report_contention() {
		let storage = storage(20);
		seed(&storage, "o1", OrderStatus::Confirmed, None).await;
		let engine = AssignmentEngine::new(storage.clone(), &config(2));

		let mut holder = storage.begin();
		holder.lock(StorageKey::Orders.as_str(), "o1").await.unwrap();

		let result = engine.attempt_accept("o1", &Actor::driver("d1")).await;
		assert!(matches!(
			result,
			Err(AssignmentError::Conflict(ConflictReason::Contended))
		));
		drop(holder);

		let committed = engine.attempt_accept("o1", &Actor::driver("d1")).await.unwrap();
		assert_eq!(committed.after.driver_id.as_deref(), Some("d1"));
	}

	#[tokio::test]
	async fn test_retry_succeeds_after_lock_release() {
		let storage = storage(20);
		seed(&storage, "o1", OrderStatus::Confirmed, None).await;
		let engine = AssignmentEngine::new(storage.clone(), &config(3));

		let mut holder = storage.begin();
		holder.lock(StorageKey::Orders.as_str(), "o1").await.unwrap();
		let release = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(30)).await;
			drop(holder);
		});

		let committed = engine.attempt_accept("o1", &Actor::driver("d1")).await.unwrap();
		release.await.unwrap();
		assert_eq!(committed.before.status, OrderStatus::Confirmed);
		assert_eq!(committed.after.status, OrderStatus::Assigned);
	}

	#[tokio::test]
	async fn test_rejected_decision_writes_nothing() {
		let storage = storage(50);
		seed(&storage, "o1", OrderStatus::Pending, None).await;
		let engine = AssignmentEngine::new(storage.clone(), &config(3));

		let result = engine
			.run_exclusive("o1", |_| Err(AssignmentError::Conflict(ConflictReason::NotConfirmed)))
			.await;
		assert!(result.is_err());

		let stored: Order = storage.retrieve(StorageKey::Orders.as_str(), "o1").await.unwrap();
		assert_eq!(stored.version, 1);
		assert_eq!(storage.locks().prune(), 1);
	}
}
