//! Order state machine.
//!
//! Orders move PENDING -> CONFIRMED -> ASSIGNED -> PICKED_UP -> IN_TRANSIT ->
//! DELIVERED, and may be cancelled by an admin until pickup. Every target
//! status is reached by exactly one edge, and each edge belongs to one role.
//! The machine is pure: it validates a move and returns the updated order,
//! callers persist it under the row lock.

use delivery_types::{Actor, Order, OrderStatus, Role};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised when a requested transition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
	#[error("Invalid transition from {from} to {to} for role {role}")]
	InvalidTransition {
		from: OrderStatus,
		to: OrderStatus,
		role: Role,
	},
	#[error("Unauthorized: {0}")]
	Unauthorized(String),
}

/// Named edges of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
	Confirm,
	Accept,
	PickUp,
	Depart,
	Deliver,
	Cancel,
}

impl fmt::Display for Transition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Transition::Confirm => "confirm",
			Transition::Accept => "accept",
			Transition::PickUp => "pickup",
			Transition::Depart => "depart",
			Transition::Deliver => "deliver",
			Transition::Cancel => "cancel",
		};
		f.write_str(name)
	}
}

#[derive(Debug)]
struct Edge {
	transition: Transition,
	sources: &'static [OrderStatus],
	target: OrderStatus,
	role: Role,
	/// The acting driver must be the order's driver.
	requires_ownership: bool,
}

const EDGES: &[Edge] = &[
	Edge {
		transition: Transition::Confirm,
		sources: &[OrderStatus::Pending],
		target: OrderStatus::Confirmed,
		role: Role::Admin,
		requires_ownership: false,
	},
	Edge {
		transition: Transition::Accept,
		sources: &[OrderStatus::Confirmed],
		target: OrderStatus::Assigned,
		role: Role::Driver,
		requires_ownership: false,
	},
	Edge {
		transition: Transition::PickUp,
		sources: &[OrderStatus::Assigned],
		target: OrderStatus::PickedUp,
		role: Role::Driver,
		requires_ownership: true,
	},
	Edge {
		transition: Transition::Depart,
		sources: &[OrderStatus::PickedUp],
		target: OrderStatus::InTransit,
		role: Role::Driver,
		requires_ownership: true,
	},
	Edge {
		transition: Transition::Deliver,
		sources: &[OrderStatus::InTransit],
		target: OrderStatus::Delivered,
		role: Role::Driver,
		requires_ownership: true,
	},
	Edge {
		transition: Transition::Cancel,
		sources: &[
			OrderStatus::Pending,
			OrderStatus::Confirmed,
			OrderStatus::Assigned,
		],
		target: OrderStatus::Cancelled,
		role: Role::Admin,
		requires_ownership: false,
	},
];

static EDGES_BY_TARGET: Lazy<HashMap<OrderStatus, &'static Edge>> =
	Lazy::new(|| EDGES.iter().map(|edge| (edge.target, edge)).collect());

/// Validates and applies order status transitions.
pub struct OrderStateMachine;

impl OrderStateMachine {
	/// Status every new order starts in.
	pub const INITIAL: OrderStatus = OrderStatus::Pending;

	/// Role that owns the edge into `to`, if the status is reachable at all.
	///
	/// Depends only on the target, so callers can reject the wrong role
	/// before locking the row.
	pub fn required_role(to: OrderStatus) -> Option<Role> {
		EDGES_BY_TARGET.get(&to).map(|edge| edge.role)
	}

	/// Checks that `role` may ever move an order into `to`.
	pub fn authorize(from: OrderStatus, to: OrderStatus, role: Role) -> Result<Transition, TransitionError> {
		let edge = EDGES_BY_TARGET
			.get(&to)
			.ok_or(TransitionError::InvalidTransition { from, to, role })?;
		if edge.role != role {
			return Err(TransitionError::Unauthorized(format!(
				"role {} cannot {} orders",
				role, edge.transition
			)));
		}
		Ok(edge.transition)
	}

	/// Full check of moving `order` into `to` on behalf of `actor`.
	pub fn check(order: &Order, actor: &Actor, to: OrderStatus) -> Result<Transition, TransitionError> {
		let from = order.status;
		let transition = Self::authorize(from, to, actor.role)?;
		let edge = EDGES_BY_TARGET[&to];

		if !Self::is_valid_transition(from, to) {
			return Err(TransitionError::InvalidTransition {
				from,
				to,
				role: actor.role,
			});
		}
		if edge.requires_ownership && order.driver_id.as_deref() != Some(actor.id.as_str()) {
			return Err(TransitionError::Unauthorized(format!(
				"order {} is not assigned to driver {}",
				order.id, actor.id
			)));
		}
		Ok(transition)
	}

	/// Returns `order` moved into `to`, with driver fields, version and
	/// timestamps updated.
	pub fn apply(
		order: &Order,
		actor: &Actor,
		to: OrderStatus,
		now: u64,
	) -> Result<Order, TransitionError> {
		let transition = Self::check(order, actor, to)?;

		let mut next = order.clone();
		next.status = to;
		next.version += 1;
		next.updated_at = now;
		match transition {
			Transition::Accept => {
				next.driver_id = Some(actor.id.clone());
				next.assigned_at = Some(now);
			},
			Transition::Cancel => {
				next.driver_id = None;
				next.assigned_at = None;
			},
			_ => {},
		}
		Ok(next)
	}

	/// Whether any role may move an order from `from` to `to`.
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		EDGES_BY_TARGET
			.get(&to)
			.is_some_and(|edge| edge.sources.contains(&from))
	}

	/// Targets reachable from `from` by `role`, in lifecycle order.
	pub fn allowed_targets(from: OrderStatus, role: Role) -> Vec<OrderStatus> {
		EDGES
			.iter()
			.filter(|edge| edge.role == role && edge.sources.contains(&from))
			.map(|edge| edge.target)
			.collect()
	}
}
