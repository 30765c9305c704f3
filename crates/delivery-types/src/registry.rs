//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Pluggable backends (currently storage) expose a `Registry` type that
/// names the backend as it appears under `[storage.implementations.<name>]`
/// and hands out its factory function.
pub trait ImplementationRegistry {
	/// Configuration name, e.g. "memory" or "file".
	const NAME: &'static str;

	/// Factory function type for this kind of implementation.
	type Factory;

	fn factory() -> Self::Factory;
}
