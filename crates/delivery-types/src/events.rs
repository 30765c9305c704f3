//! Event types published after state transitions commit.
//!
//! Events flow through the event bus to notification handlers and any other
//! subscriber. They are only published once the corresponding write is
//! durable, so subscribers never see a reservation that was rolled back.

use crate::{Order, OrderStatus, Product, Store};
use serde::{Deserialize, Serialize};

/// Main event type encompassing all marketplace events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketplaceEvent {
	/// Events from the order lifecycle.
	Order(OrderEvent),
	/// Events from the product catalog.
	Catalog(CatalogEvent),
}

/// Events related to order lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A customer placed a new order.
	Created { order: Order },
	/// An admin confirmed a pending order.
	Confirmed { order_id: String },
	/// A driver won the order.
	Assigned { order_id: String, driver_id: String },
	/// The assigned driver advanced the delivery.
	StatusChanged {
		order_id: String,
		customer_id: String,
		driver_id: String,
		from: OrderStatus,
		to: OrderStatus,
	},
	/// An admin cancelled the order, releasing the driver if one held it.
	Cancelled {
		order_id: String,
		customer_id: String,
		released_driver: Option<String>,
	},
}

/// Events related to catalog changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CatalogEvent {
	StoreAdded { store: Store },
	StoreUpdated { store: Store },
	StoreRemoved { store_id: String },
	ProductAdded { product: Product },
	ProductUpdated { product: Product },
	ProductRemoved { product_id: String },
	PriceChanged { product_id: String, price: rust_decimal::Decimal },
	Restocked { product_id: String, stock: u32 },
}
