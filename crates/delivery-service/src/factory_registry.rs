//! Registry of pluggable implementations available to this binary.
//!
//! Configuration names an implementation under
//! `[storage.implementations.<name>]`; the registry resolves that name to the
//! factory that builds it.

use delivery_config::Config;
use delivery_core::{MarketplaceBuilder, MarketplaceEngine, MarketplaceFactories};
use delivery_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

pub fn initialize_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in delivery_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		registry
	})
}

pub fn get_registry() -> &'static FactoryRegistry {
	initialize_registry()
}

/// Resolves every configured implementation and builds the engine.
pub fn build_engine_from_config(
	config: Config,
) -> Result<MarketplaceEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let mut storage_factories = HashMap::new();
	for name in config.storage.implementations.keys() {
		let Some(factory) = registry.storage.get(name) else {
			let mut available: Vec<_> = registry.storage.keys().cloned().collect();
			available.sort();
			return Err(format!(
				"Unknown storage implementation '{}'. Available: [{}]",
				name,
				available.join(", ")
			)
			.into());
		};
		storage_factories.insert(name.clone(), *factory);
	}

	let engine = MarketplaceBuilder::new(config).build(MarketplaceFactories { storage_factories })?;
	Ok(engine)
}
