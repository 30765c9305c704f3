//! Order lifecycle rules.

pub mod order;

pub use order::{OrderStateMachine, Transition, TransitionError};
