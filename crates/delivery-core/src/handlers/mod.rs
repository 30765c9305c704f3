//! Services behind the marketplace operations.
//!
//! The order lifecycle and the catalog check the caller's role, run their
//! writes in storage transactions and publish events once those commit. The
//! notification handler consumes the events.

pub mod catalog;
pub mod notification;
pub mod order;

pub use catalog::CatalogService;
pub use notification::{Notification, NotificationHandler};
pub use order::OrderLifecycle;

use crate::engine::assignment::{AssignmentError, ConflictReason};
use crate::idempotency::IdempotencyError;
use crate::state::TransitionError;
use delivery_storage::StorageError;
use delivery_types::{Actor, OrderStatus, Role, Scope};
use thiserror::Error;

/// Errors returned by marketplace operations.
///
/// Each variant maps to one HTTP status at the service boundary.
#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Unauthorized: {0}")]
	Unauthorized(String),
	#[error("Invalid transition from {from} to {to} for role {role}")]
	InvalidTransition {
		from: OrderStatus,
		to: OrderStatus,
		role: Role,
	},
	#[error("Conflict: {0}")]
	Conflict(ConflictReason),
	#[error("Idempotency key is required")]
	IdempotencyKeyRequired,
	#[error("Idempotency key was already used with a different request")]
	IdempotencyKeyReuse,
	#[error("Timed out: {0}")]
	Timeout(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Storage unavailable: {0}")]
	Unavailable(String),
}

impl From<TransitionError> for LifecycleError {
	fn from(e: TransitionError) -> Self {
		match e {
			TransitionError::InvalidTransition { from, to, role } => {
				LifecycleError::InvalidTransition { from, to, role }
			},
			TransitionError::Unauthorized(reason) => LifecycleError::Unauthorized(reason),
		}
	}
}

impl From<AssignmentError> for LifecycleError {
	fn from(e: AssignmentError) -> Self {
		match e {
			AssignmentError::NotFound(id) => LifecycleError::NotFound(format!("order {}", id)),
			AssignmentError::Conflict(reason) => LifecycleError::Conflict(reason),
			AssignmentError::Transition(e) => e.into(),
			AssignmentError::Storage(e) => e.into(),
		}
	}
}

impl From<IdempotencyError> for LifecycleError {
	fn from(e: IdempotencyError) -> Self {
		match e {
			IdempotencyError::KeyRequired => LifecycleError::IdempotencyKeyRequired,
			IdempotencyError::KeyReuse => LifecycleError::IdempotencyKeyReuse,
			IdempotencyError::Timeout => {
				LifecycleError::Timeout("request with the same idempotency key in flight".into())
			},
			IdempotencyError::Storage(e) => e.into(),
		}
	}
}

impl From<StorageError> for LifecycleError {
	fn from(e: StorageError) -> Self {
		match e {
			StorageError::NotFound => LifecycleError::NotFound("record".into()),
			StorageError::LockTimeout(key) => LifecycleError::Timeout(format!("{} is busy", key)),
			StorageError::StaleWrite(_) => LifecycleError::Conflict(ConflictReason::Contended),
			other => LifecycleError::Unavailable(other.to_string()),
		}
	}
}

/// Fails unless the actor's role grants `scope`.
pub(crate) fn require_scope(actor: &Actor, scope: Scope) -> Result<(), LifecycleError> {
	if actor.can(scope) {
		Ok(())
	} else {
		Err(LifecycleError::Unauthorized(format!(
			"role {} lacks scope {:?}",
			actor.role, scope
		)))
	}
}

/// Parses a wire status name.
pub fn parse_status(status: &str) -> Result<OrderStatus, LifecycleError> {
	status
		.parse()
		.map_err(|_| LifecycleError::Validation(format!("Invalid status: {}", status)))
}
