//! Order types for the delivery marketplace.
//!
//! This module defines the order record persisted by the storage layer,
//! its lifecycle status and the line items captured at purchase time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A customer order and its delivery state.
///
/// The order row is the unit of mutual exclusion: every state change is
/// written under the row lock and advances `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Customer that placed the order.
	pub customer_id: String,
	/// Driver holding the delivery. Only set while the order is assigned or later.
	#[serde(default)]
	pub driver_id: Option<String>,
	/// Current lifecycle status.
	pub status: OrderStatus,
	/// Line items with the unit price captured at creation.
	pub items: Vec<OrderItem>,
	/// Sum of all line totals, fixed at creation.
	pub total_price: Decimal,
	/// Monotonic write counter, starts at 1.
	pub version: u64,
	/// Timestamp when this order was created.
	pub created_at: u64,
	/// Timestamp when this order was last updated.
	pub updated_at: u64,
	/// Timestamp when the current driver accepted the order.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub assigned_at: Option<u64>,
}

impl Order {
	/// Returns true when the driver assignment matches the status.
	///
	/// A driver must be present exactly for the assigned, picked up,
	/// in transit and delivered states.
	pub fn driver_invariant_holds(&self) -> bool {
		self.driver_id.is_some() == self.status.requires_driver()
	}
}

/// A single line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
	pub product_id: String,
	pub quantity: u32,
	/// Catalog price at the moment the order was created.
	pub unit_price_at_purchase: Decimal,
}

impl OrderItem {
	/// Price times quantity, `None` on overflow.
	pub fn line_total(&self) -> Option<Decimal> {
		self.unit_price_at_purchase
			.checked_mul(Decimal::from(self.quantity))
	}
}

/// Requested line item, before prices are captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
	pub product_id: String,
	pub quantity: u32,
}

/// Delivery summary for one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
	pub driver_id: String,
	pub delivered_count: u64,
	/// Sum of the totals of delivered orders.
	pub total_earnings: Decimal,
	/// Orders assigned to the driver that are not yet delivered.
	pub active_deliveries: u64,
	pub average_per_delivery: Decimal,
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
	/// Placed by the customer, waiting for an admin.
	Pending,
	/// Approved by an admin, open for drivers.
	Confirmed,
	/// Claimed by exactly one driver.
	Assigned,
	PickedUp,
	InTransit,
	/// Terminal.
	Delivered,
	/// Terminal.
	Cancelled,
}

impl OrderStatus {
	/// Returns the canonical wire name of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "PENDING",
			OrderStatus::Confirmed => "CONFIRMED",
			OrderStatus::Assigned => "ASSIGNED",
			OrderStatus::PickedUp => "PICKED_UP",
			OrderStatus::InTransit => "IN_TRANSIT",
			OrderStatus::Delivered => "DELIVERED",
			OrderStatus::Cancelled => "CANCELLED",
		}
	}

	/// Returns an iterator over all statuses.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Pending,
			Self::Confirmed,
			Self::Assigned,
			Self::PickedUp,
			Self::InTransit,
			Self::Delivered,
			Self::Cancelled,
		]
		.into_iter()
	}

	/// Terminal states have no outgoing transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
	}

	/// States in which `driver_id` must be set.
	pub fn requires_driver(&self) -> bool {
		matches!(
			self,
			OrderStatus::Assigned
				| OrderStatus::PickedUp
				| OrderStatus::InTransit
				| OrderStatus::Delivered
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OrderStatus::all()
			.find(|status| status.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| format!("Unknown order status: {}", s))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_round_trips_through_wire_name() {
		for status in OrderStatus::all() {
			assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
			let json = serde_json::to_string(&status).unwrap();
			assert_eq!(json, format!("\"{}\"", status.as_str()));
		}
		assert_eq!("picked_up".parse::<OrderStatus>().unwrap(), OrderStatus::PickedUp);
		assert!("shipped".parse::<OrderStatus>().is_err());
	}

	#[test]
	fn test_driver_invariant() {
		let mut order = Order {
			id: "o1".into(),
			customer_id: "c1".into(),
			driver_id: None,
			status: OrderStatus::Confirmed,
			items: vec![],
			total_price: Decimal::ZERO,
			version: 1,
			created_at: 0,
			updated_at: 0,
			assigned_at: None,
		};
		assert!(order.driver_invariant_holds());

		order.status = OrderStatus::Assigned;
		assert!(!order.driver_invariant_holds());

		order.driver_id = Some("d1".into());
		assert!(order.driver_invariant_holds());
	}
}
