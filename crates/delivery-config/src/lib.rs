//! Configuration module for the delivery marketplace.
//!
//! This module provides structures and utilities for managing service
//! configuration. It supports loading configuration from TOML files and
//! validates every section before the service is built.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(any(test, feature = "testing"))]
pub mod builders {
	pub mod config;
}
mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message without the input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the marketplace service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Retry policy and lock wait of the assignment engine.
	#[serde(default)]
	pub assignment: AssignmentConfig,
	/// Retention and wait bounds of the idempotency layer.
	#[serde(default)]
	pub idempotency: IdempotencyConfig,
	/// Event bus settings.
	#[serde(default)]
	pub events: EventsConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this instance, used in logs.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired entries and idle locks.
	pub cleanup_interval_seconds: u64,
}

/// Assignment engine settings.
///
/// A contended acquisition is retried up to `max_attempts` times in total,
/// sleeping `base_backoff_ms * backoff_multiplier^n` between attempts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignmentConfig {
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_base_backoff_ms")]
	pub base_backoff_ms: u64,
	#[serde(default = "default_backoff_multiplier")]
	pub backoff_multiplier: f64,
	/// Bounded wait for one row lock acquisition.
	#[serde(default = "default_lock_timeout_ms")]
	pub lock_timeout_ms: u64,
}

impl Default for AssignmentConfig {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			base_backoff_ms: default_base_backoff_ms(),
			backoff_multiplier: default_backoff_multiplier(),
			lock_timeout_ms: default_lock_timeout_ms(),
		}
	}
}

impl AssignmentConfig {
	pub fn base_backoff(&self) -> Duration {
		Duration::from_millis(self.base_backoff_ms)
	}

	pub fn lock_timeout(&self) -> Duration {
		Duration::from_millis(self.lock_timeout_ms)
	}
}

fn default_max_attempts() -> u32 {
	3
}

fn default_base_backoff_ms() -> u64 {
	10
}

fn default_backoff_multiplier() -> f64 {
	4.0
}

fn default_lock_timeout_ms() -> u64 {
	500
}

/// Idempotency layer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdempotencyConfig {
	/// How long a recorded response is replayed. Defaults to 7 days.
	#[serde(default = "default_retention_hours")]
	pub retention_hours: u64,
	/// Bounded wait for a concurrent duplicate to finish.
	#[serde(default = "default_in_flight_wait_ms")]
	pub in_flight_wait_ms: u64,
	/// Poll period while waiting for another process's record to appear.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
}

impl Default for IdempotencyConfig {
	fn default() -> Self {
		Self {
			retention_hours: default_retention_hours(),
			in_flight_wait_ms: default_in_flight_wait_ms(),
			poll_interval_ms: default_poll_interval_ms(),
		}
	}
}

impl IdempotencyConfig {
	/// Longest accepted retention, ten years.
	pub const MAX_RETENTION_HOURS: u64 = 87_600;

	pub fn retention(&self) -> Duration {
		Duration::from_secs(self.retention_hours.saturating_mul(3600))
	}

	pub fn in_flight_wait(&self) -> Duration {
		Duration::from_millis(self.in_flight_wait_ms)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}
}

fn default_retention_hours() -> u64 {
	168
}

fn default_in_flight_wait_ms() -> u64 {
	5000
}

fn default_poll_interval_ms() -> u64 {
	25
}

/// Event bus settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
	/// Broadcast channel capacity. Slow subscribers lag past this.
	#[serde(default = "default_event_capacity")]
	pub capacity: usize,
}

impl Default for EventsConfig {
	fn default() -> Self {
		Self {
			capacity: default_event_capacity(),
		}
	}
}

fn default_event_capacity() -> usize {
	1000
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	/// CORS configuration. Permissive when absent.
	pub cors: Option<CorsConfig>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	/// Allowed origins for CORS.
	pub allowed_origins: Vec<String>,
	/// Allowed headers for CORS.
	pub allowed_headers: Vec<String>,
	/// Allowed methods for CORS.
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024 // 1MB
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)))
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), ConfigError> {
	if condition {
		Ok(())
	} else {
		Err(ConfigError::Validation(message.into()))
	}
}

impl Config {
	/// Loads configuration from a file, resolving includes and environment
	/// variables.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates every section.
	pub fn validate(&self) -> Result<(), ConfigError> {
		ensure(
			!self.service.id.trim().is_empty(),
			"Service ID cannot be empty",
		)?;

		// Storage
		ensure(
			!self.storage.implementations.is_empty(),
			"At least one storage implementation must be configured",
		)?;
		ensure(
			!self.storage.primary.is_empty(),
			"Storage primary implementation cannot be empty",
		)?;
		ensure(
			self.storage
				.implementations
				.contains_key(&self.storage.primary),
			format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			),
		)?;
		ensure(
			self.storage.cleanup_interval_seconds > 0,
			"Storage cleanup_interval_seconds must be greater than 0",
		)?;
		ensure(
			self.storage.cleanup_interval_seconds <= 86400,
			"Storage cleanup_interval_seconds cannot exceed 86400 (24 hours)",
		)?;

		// Assignment
		let assignment = &self.assignment;
		ensure(
			(1..=10).contains(&assignment.max_attempts),
			"assignment.max_attempts must be between 1 and 10",
		)?;
		ensure(
			(1..=10_000).contains(&assignment.base_backoff_ms),
			"assignment.base_backoff_ms must be between 1 and 10000",
		)?;
		ensure(
			(1.0..=16.0).contains(&assignment.backoff_multiplier),
			"assignment.backoff_multiplier must be between 1 and 16",
		)?;
		ensure(
			(1..=60_000).contains(&assignment.lock_timeout_ms),
			"assignment.lock_timeout_ms must be between 1 and 60000",
		)?;

		// Idempotency
		let idempotency = &self.idempotency;
		ensure(
			idempotency.retention_hours > 0
				&& idempotency.retention_hours <= IdempotencyConfig::MAX_RETENTION_HOURS,
			"idempotency.retention_hours must be between 1 and 87600",
		)?;
		ensure(
			idempotency.in_flight_wait_ms > 0,
			"idempotency.in_flight_wait_ms must be greater than 0",
		)?;
		ensure(
			idempotency.poll_interval_ms > 0
				&& idempotency.poll_interval_ms < idempotency.in_flight_wait_ms,
			"idempotency.poll_interval_ms must be positive and below in_flight_wait_ms",
		)?;

		ensure(self.events.capacity > 0, "events.capacity must be greater than 0")?;

		if let Some(api) = self.api.as_ref().filter(|api| api.enabled) {
			ensure(api.timeout_seconds > 0, "api.timeout_seconds must be greater than 0")?;
			ensure(
				api.max_request_size > 0,
				"api.max_request_size must be greater than 0",
			)?;
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables, then validates it.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[service]
id = "mall-1"

[storage]
primary = "memory"
cleanup_interval_seconds = 60
[storage.implementations.memory]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("TEST_HOST", "localhost");
		std::env::set_var("TEST_PORT", "5432");

		let input = "host = \"${TEST_HOST}:${TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("TEST_HOST");
		std::env::remove_var("TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${MISSING_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("MISSING_VAR"));
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.service.id, "mall-1");
		assert_eq!(config.assignment.max_attempts, 3);
		assert_eq!(config.assignment.base_backoff(), Duration::from_millis(10));
		assert_eq!(config.assignment.backoff_multiplier, 4.0);
		assert_eq!(config.assignment.lock_timeout(), Duration::from_millis(500));
		assert_eq!(config.idempotency.retention(), Duration::from_secs(7 * 24 * 3600));
		assert_eq!(config.events.capacity, 1000);
		assert!(config.api.is_none());
	}

	#[test]
	fn test_config_with_env_vars() {
		std::env::set_var("TEST_SERVICE_ID", "mall-env");

		let config_str = r#"
[service]
id = "${TEST_SERVICE_ID}"

[storage]
primary = "file"
cleanup_interval_seconds = 3600
[storage.implementations.file]
storage_path = "${TEST_STORAGE_PATH:-./data/storage}"

[assignment]
max_attempts = 5
lock_timeout_ms = 250

[api]
enabled = true
port = 8080
"#;

		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.service.id, "mall-env");
		assert_eq!(config.assignment.max_attempts, 5);
		assert_eq!(config.assignment.base_backoff_ms, 10);
		assert_eq!(
			config.storage.implementations["file"]
				.get("storage_path")
				.and_then(|v| v.as_str()),
			Some("./data/storage")
		);
		let api = config.api.unwrap();
		assert_eq!(api.port, 8080);
		assert_eq!(api.host, "127.0.0.1");

		std::env::remove_var("TEST_SERVICE_ID");
	}

	#[test]
	fn test_unknown_primary_storage_rejected() {
		let config_str = MINIMAL.replace("primary = \"memory\"", "primary = \"redis\"");
		let err = config_str.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary storage 'redis'"));
	}

	#[test]
	fn test_out_of_range_settings_rejected() {
		let cases = [
			"[assignment]\nmax_attempts = 0",
			"[assignment]\nmax_attempts = 11",
			"[assignment]\nbackoff_multiplier = 0.5",
			"[assignment]\nlock_timeout_ms = 0",
			"[idempotency]\npoll_interval_ms = 6000",
			"[idempotency]\nretention_hours = 0",
			"[idempotency]\nretention_hours = 87601",
			"[events]\ncapacity = 0",
		];
		for extra in cases {
			let config_str = format!("{}\n{}", MINIMAL, extra);
			assert!(
				config_str.parse::<Config>().is_err(),
				"accepted invalid config: {}",
				extra
			);
		}

		let empty_id = MINIMAL.replace("id = \"mall-1\"", "id = \"\"");
		assert!(empty_id.parse::<Config>().is_err());

		let zero_interval =
			MINIMAL.replace("cleanup_interval_seconds = 60", "cleanup_interval_seconds = 0");
		assert!(zero_interval.parse::<Config>().is_err());

		let longest = format!("{}\n[idempotency]\nretention_hours = 87600", MINIMAL);
		let config: Config = longest.parse().unwrap();
		assert_eq!(
			config.idempotency.retention(),
			Duration::from_secs(87_600 * 3600)
		);
		let unchecked = IdempotencyConfig {
			retention_hours: u64::MAX,
			..IdempotencyConfig::default()
		};
		assert_eq!(unchecked.retention(), Duration::from_secs(u64::MAX));
	}
}
