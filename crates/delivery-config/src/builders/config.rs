//! Configuration builder for tests and local development.

use crate::{
	ApiConfig, AssignmentConfig, Config, EventsConfig, IdempotencyConfig, ServiceConfig,
	StorageConfig,
};
use std::collections::HashMap;

/// Builds a valid [`Config`] backed by memory storage unless told otherwise.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	storage_cleanup_interval_seconds: u64,
	assignment: AssignmentConfig,
	idempotency: IdempotencyConfig,
	event_capacity: usize,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::Table::new()),
		);
		Self {
			service_id: "test-mall".to_string(),
			storage_primary: "memory".to_string(),
			storage_implementations,
			storage_cleanup_interval_seconds: 60,
			assignment: AssignmentConfig::default(),
			idempotency: IdempotencyConfig::default(),
			event_capacity: 1000,
			api: None,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	/// Selects the primary storage and registers its settings.
	pub fn storage(mut self, primary: impl Into<String>, settings: toml::Value) -> Self {
		let primary = primary.into();
		self.storage_implementations
			.insert(primary.clone(), settings);
		self.storage_primary = primary;
		self
	}

	pub fn storage_cleanup_interval_seconds(mut self, interval: u64) -> Self {
		self.storage_cleanup_interval_seconds = interval;
		self
	}

	pub fn assignment(mut self, assignment: AssignmentConfig) -> Self {
		self.assignment = assignment;
		self
	}

	pub fn idempotency(mut self, idempotency: IdempotencyConfig) -> Self {
		self.idempotency = idempotency;
		self
	}

	pub fn event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: self.storage_cleanup_interval_seconds,
			},
			assignment: self.assignment,
			idempotency: self.idempotency,
			events: EventsConfig {
				capacity: self.event_capacity,
			},
			api: self.api,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_built_config_is_valid() {
		let config = ConfigBuilder::new().service_id("builder").build();
		assert!(config.validate().is_ok());
		assert_eq!(config.storage.primary, "memory");
	}
}
