//! Common types for the mall delivery marketplace.
//!
//! This crate defines the data types shared by every other crate in the
//! workspace: orders and their status, actors and role scopes, catalog
//! products, events, storage namespaces and HTTP request/response bodies.

/// Actor identity and the compile-time role scope table.
pub mod actor;
/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Mall stores and their products.
pub mod catalog;
/// Event types published after a state change commits.
pub mod events;
/// Order records, line items and lifecycle statuses.
pub mod order;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;
/// Utility functions for timestamps and log formatting.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use actor::*;
pub use api::*;
pub use catalog::*;
pub use events::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::{current_timestamp, truncate_id};
pub use validation::*;
