//! Startup and shutdown of the marketplace engine.

use super::{EngineError, MarketplaceEngine};
use delivery_types::StorageKey;

impl MarketplaceEngine {
	/// Checks that storage answers and logs the effective tuning.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		let orders = self
			.storage
			.list::<serde_json::Value>(StorageKey::Orders.as_str())
			.await
			.map_err(|e| EngineError::Service(format!("Storage is not readable: {}", e)))?;

		tracing::info!(
			service_id = %self.config.service.id,
			orders = orders.len(),
			max_attempts = self.config.assignment.max_attempts,
			lock_timeout_ms = self.config.assignment.lock_timeout_ms,
			"Initializing marketplace engine"
		);
		Ok(())
	}

	/// Runs a final maintenance pass.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down marketplace engine");
		let report = self.run_maintenance().await;
		tracing::debug!(
			expired = report.expired_entries,
			pruned_locks = report.pruned_locks,
			"Final maintenance pass"
		);
		Ok(())
	}
}
