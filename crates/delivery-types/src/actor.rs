//! Actor identity and role scopes.
//!
//! The surrounding gateway authenticates callers and hands the core an
//! [`Actor`]. What each role may do is a fixed table resolved at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Customer,
	Driver,
	Admin,
}

/// Permission scopes granted to roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
	/// Place new orders.
	OrdersCreate,
	/// Read own order history.
	OrdersReadOwn,
	/// Read available and assigned orders.
	OrdersRead,
	/// Read every order in the system.
	OrdersReadAll,
	/// Accept orders and move them through delivery.
	OrdersUpdateStatus,
	/// Confirm and cancel orders.
	OrdersModerate,
	/// Read stores and the product catalog.
	ProductsRead,
	/// Manage stores and products, including prices and stock.
	ProductsManage,
}

const CUSTOMER_SCOPES: &[Scope] = &[Scope::OrdersCreate, Scope::OrdersReadOwn, Scope::ProductsRead];
const DRIVER_SCOPES: &[Scope] = &[Scope::OrdersRead, Scope::OrdersUpdateStatus, Scope::ProductsRead];
const ADMIN_SCOPES: &[Scope] = &[
	Scope::OrdersReadAll,
	Scope::OrdersModerate,
	Scope::ProductsRead,
	Scope::ProductsManage,
];

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Customer => "customer",
			Role::Driver => "driver",
			Role::Admin => "admin",
		}
	}

	/// Scopes granted to this role.
	pub fn scopes(&self) -> &'static [Scope] {
		match self {
			Role::Customer => CUSTOMER_SCOPES,
			Role::Driver => DRIVER_SCOPES,
			Role::Admin => ADMIN_SCOPES,
		}
	}

	pub fn has_scope(&self, scope: Scope) -> bool {
		self.scopes().contains(&scope)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"customer" => Ok(Role::Customer),
			"driver" => Ok(Role::Driver),
			"admin" => Ok(Role::Admin),
			other => Err(format!("Unknown role: {}", other)),
		}
	}
}

/// Validated identity of the caller of a core operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
	pub id: String,
	pub role: Role,
}

impl Actor {
	pub fn new(id: impl Into<String>, role: Role) -> Self {
		Self {
			id: id.into(),
			role,
		}
	}

	pub fn customer(id: impl Into<String>) -> Self {
		Self::new(id, Role::Customer)
	}

	pub fn driver(id: impl Into<String>) -> Self {
		Self::new(id, Role::Driver)
	}

	pub fn admin(id: impl Into<String>) -> Self {
		Self::new(id, Role::Admin)
	}

	pub fn can(&self, scope: Scope) -> bool {
		self.role.has_scope(scope)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_scope_table() {
		assert!(Role::Customer.has_scope(Scope::OrdersCreate));
		assert!(!Role::Customer.has_scope(Scope::OrdersUpdateStatus));
		assert!(Role::Driver.has_scope(Scope::OrdersUpdateStatus));
		assert!(!Role::Driver.has_scope(Scope::OrdersModerate));
		assert!(Role::Admin.has_scope(Scope::OrdersModerate));
		assert!(!Role::Admin.has_scope(Scope::OrdersCreate));
	}

	#[test]
	fn test_role_parsing() {
		assert_eq!("Driver".parse::<Role>().unwrap(), Role::Driver);
		assert!("store_owner".parse::<Role>().is_err());
	}
}
