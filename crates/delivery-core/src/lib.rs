//! Core of the mall delivery marketplace.
//!
//! Holds the order state machine, the assignment engine that serializes
//! writers on an order row, the idempotency layer for client retries and the
//! services built on them. [`MarketplaceBuilder`] assembles a
//! [`MarketplaceEngine`] from configuration and storage factories.

pub mod builder;
pub mod engine;
pub mod handlers;
pub mod idempotency;
pub mod state;

pub use builder::{BuilderError, MarketplaceBuilder, MarketplaceFactories};
pub use engine::assignment::{AssignmentEngine, AssignmentError, Committed, ConflictReason};
pub use engine::event_bus::EventBus;
pub use engine::{EngineError, MaintenanceReport, MarketplaceEngine};
pub use handlers::{
	parse_status, CatalogService, LifecycleError, Notification, NotificationHandler,
	OrderLifecycle,
};
pub use idempotency::{IdempotencyError, IdempotencyLayer, IdempotentOutcome};
pub use state::{OrderStateMachine, Transition, TransitionError};
