//! Builder for constructing marketplace engines.
//!
//! Storage backends are pluggable: the builder instantiates every configured
//! implementation it has a factory for and serves the primary one.

use crate::engine::{event_bus::EventBus, MarketplaceEngine};
use delivery_config::Config;
use delivery_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions keyed by implementation name.
pub struct MarketplaceFactories<SF> {
	pub storage_factories: HashMap<String, SF>,
}

pub struct MarketplaceBuilder {
	config: Config,
}

impl MarketplaceBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub fn build<SF>(self, factories: MarketplaceFactories<SF>) -> Result<MarketplaceEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = factories.storage_factories.get(name) else {
				tracing::warn!(component = "storage", implementation = %name, "No factory registered");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					storage_impls.insert(name.clone(), implementation);
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
				},
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if storage_impls.is_empty() {
			return Err(BuilderError::Config(
				"No valid storage implementations available".into(),
			));
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::MissingComponent(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;

		let storage = Arc::new(
			StorageService::new(storage_backend)
				.with_lock_timeout(self.config.assignment.lock_timeout()),
		);
		let event_bus = EventBus::new(self.config.events.capacity);

		Ok(MarketplaceEngine::new(self.config, storage, event_bus))
	}
}
