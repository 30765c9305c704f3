//! Small helpers shared across the marketplace crates.

pub mod formatting;
pub mod helpers;

pub use formatting::truncate_id;
pub use helpers::current_timestamp;
