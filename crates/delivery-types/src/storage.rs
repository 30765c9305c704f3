//! Storage-related types for the marketplace.

use std::str::FromStr;

/// Storage namespaces for the different record collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order rows
	Orders,
	/// Mall stores
	Stores,
	/// Catalog products
	Products,
	/// Idempotency records keyed by token hash
	Idempotency,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Stores => "stores",
			StorageKey::Products => "products",
			StorageKey::Idempotency => "idempotency",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::Stores,
			Self::Products,
			Self::Idempotency,
		].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"stores" => Ok(Self::Stores),
			"products" => Ok(Self::Products),
			"idempotency" => Ok(Self::Idempotency),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
