//! String formatting for log output.

/// Shortens an identifier for log lines.
///
/// Order ids are UUIDs and idempotency hashes are 64 hex characters; the
/// first 8 characters are enough to correlate entries.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}
