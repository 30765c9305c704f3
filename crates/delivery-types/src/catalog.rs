//! Catalog types: mall stores and the products they sell.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A store in the mall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
	pub id: String,
	pub name: String,
	pub category: Option<String>,
}

/// Input for creating a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStore {
	pub name: String,
	#[serde(default)]
	pub category: Option<String>,
}

/// Partial store update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStore {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub category: Option<String>,
}

/// A product sold by a mall store.
///
/// The price here is the current catalog price. Orders copy it into their
/// line items, so later changes never reach existing orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
	pub id: String,
	pub store_id: String,
	pub name: String,
	pub price: Decimal,
	pub stock: u32,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
	pub store_id: String,
	pub name: String,
	pub price: Decimal,
	#[serde(default)]
	pub stock: u32,
}

/// Partial product update. Price and stock have their own operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateProduct {
	#[serde(default)]
	pub name: Option<String>,
	/// Moves the product to another existing store.
	#[serde(default)]
	pub store_id: Option<String>,
}
