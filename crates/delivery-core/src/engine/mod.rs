//! Marketplace engine that owns the services and background tasks.
//!
//! The engine wires the order lifecycle and catalog to shared storage and
//! the event bus, and runs the notification handler plus periodic storage
//! maintenance until shutdown.

pub mod assignment;
pub mod event_bus;
pub mod lifecycle;

use crate::handlers::{CatalogService, NotificationHandler, OrderLifecycle};
use crate::idempotency::IdempotencyLayer;
use assignment::AssignmentEngine;
use delivery_config::Config;
use delivery_storage::StorageService;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
	/// Expired entries removed from storage, mostly idempotency records.
	pub expired_entries: usize,
	/// Unused row locks dropped from the lock table.
	pub pruned_locks: usize,
}

#[derive(Clone)]
pub struct MarketplaceEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) lifecycle: Arc<OrderLifecycle>,
	pub(crate) catalog: Arc<CatalogService>,
}

impl MarketplaceEngine {
	pub fn new(config: Config, storage: Arc<StorageService>, event_bus: event_bus::EventBus) -> Self {
		let assignment = Arc::new(AssignmentEngine::new(storage.clone(), &config.assignment));
		let idempotency = Arc::new(IdempotencyLayer::new(storage.clone(), &config.idempotency));
		let lifecycle = Arc::new(OrderLifecycle::new(
			storage.clone(),
			assignment,
			idempotency,
			event_bus.clone(),
		));
		let catalog = Arc::new(CatalogService::new(storage.clone(), event_bus.clone()));

		Self {
			config,
			storage,
			event_bus,
			lifecycle,
			catalog,
		}
	}

	/// Runs background tasks until ctrl-c.
	pub async fn run(&self) -> Result<(), EngineError> {
		let notification_handle =
			tokio::spawn(NotificationHandler::new(self.event_bus.subscribe()).run());

		let storage = self.storage.clone();
		let mut interval = tokio::time::interval(Duration::from_secs(
			self.config.storage.cleanup_interval_seconds,
		));
		let cleanup_handle = tokio::spawn(async move {
			loop {
				interval.tick().await;
				Self::maintain(&storage).await;
			}
		});

		let result = tokio::signal::ctrl_c()
			.await
			.map_err(|e| EngineError::Service(format!("Failed to listen for shutdown: {}", e)));

		cleanup_handle.abort();
		notification_handle.abort();
		result
	}

	/// Runs one maintenance pass immediately.
	pub async fn run_maintenance(&self) -> MaintenanceReport {
		Self::maintain(&self.storage).await
	}

	async fn maintain(storage: &StorageService) -> MaintenanceReport {
		let expired_entries = match storage.cleanup_expired().await {
			Ok(count) => {
				if count > 0 {
					tracing::debug!("Storage cleanup: removed {} expired entries", count);
				}
				count
			},
			Err(e) => {
				tracing::warn!("Storage cleanup failed: {}", e);
				0
			},
		};
		let pruned_locks = storage.locks().prune();
		MaintenanceReport {
			expired_entries,
			pruned_locks,
		}
	}

	pub fn lifecycle(&self) -> &Arc<OrderLifecycle> {
		&self.lifecycle
	}

	pub fn catalog(&self) -> &Arc<CatalogService> {
		&self.catalog
	}

	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use delivery_config::builders::config::ConfigBuilder;
	use delivery_storage::implementations::memory::MemoryStorage;
	use delivery_types::{Actor, NewOrderItem, NewProduct, NewStore, StorageKey};
	use rust_decimal::Decimal;

	fn engine() -> MarketplaceEngine {
		let config = ConfigBuilder::new().build();
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		MarketplaceEngine::new(config, storage, event_bus::EventBus::new(16))
	}

	#[tokio::test]
	async fn test_maintenance_prunes_idle_locks_and_expired_entries() {
		let engine = engine();
		engine
			.storage()
			.store_with_ttl(
				StorageKey::Idempotency.as_str(),
				"stale",
				&"x",
				Some(Duration::from_millis(10)),
			)
			.await
			.unwrap();

		let admin = Actor::admin("a1");
		let store = engine
			.catalog()
			.add_store(
				&admin,
				NewStore {
					name: "Tea house".into(),
					category: None,
				},
			)
			.await
			.unwrap();
		let product = engine
			.catalog()
			.add_product(
				&admin,
				NewProduct {
					store_id: store.id,
					name: "Tea".into(),
					price: Decimal::ONE,
					stock: 5,
				},
			)
			.await
			.unwrap();
		engine
			.lifecycle()
			.create_order(
				&Actor::customer("c1"),
				vec![NewOrderItem {
					product_id: product.id,
					quantity: 1,
				}],
				Some("k1"),
			)
			.await
			.unwrap();

		tokio::time::sleep(Duration::from_millis(20)).await;
		let report = engine.run_maintenance().await;
		assert_eq!(report.expired_entries, 1);
		// The store row, the product row and the idempotency key were locked.
		assert_eq!(report.pruned_locks, 3);
		assert_eq!(engine.run_maintenance().await, MaintenanceReport::default());
	}
}
