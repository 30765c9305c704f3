//! HTTP handlers for the marketplace API.
//!
//! Handlers extract the caller from gateway headers, call the core and map
//! [`LifecycleError`] onto [`APIError`] responses.

pub mod admin;
pub mod drivers;
pub mod orders;
pub mod products;
pub mod stores;

use axum::{extract::rejection::JsonRejection, extract::FromRequestParts, http::request::Parts};
use delivery_core::{LifecycleError, OrderStateMachine};
use delivery_types::{APIError, Actor, Role};
use serde_json::json;

/// Header carrying the authenticated actor id.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the authenticated actor role.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// Set to `true` on responses served from a stored idempotency record.
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "x-idempotency-replayed";

/// Seconds a client should wait before retrying a timed out request.
const TIMEOUT_RETRY_AFTER: u64 = 1;
const UNAVAILABLE_RETRY_AFTER: u64 = 5;

/// The caller as asserted by the upstream gateway.
pub struct CurrentActor(pub Actor);

impl<S> FromRequestParts<S> for CurrentActor
where
	S: Send + Sync,
{
	type Rejection = APIError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let header = |name: &str| {
			parts
				.headers
				.get(name)
				.and_then(|value| value.to_str().ok())
				.map(str::trim)
				.filter(|value| !value.is_empty())
		};

		let id = header(ACTOR_ID_HEADER).ok_or_else(|| APIError::Unauthenticated {
			error_type: "MISSING_IDENTITY".to_string(),
			message: format!("Header {} is required", ACTOR_ID_HEADER),
		})?;
		let role: Role = header(ACTOR_ROLE_HEADER)
			.ok_or_else(|| APIError::Unauthenticated {
				error_type: "MISSING_IDENTITY".to_string(),
				message: format!("Header {} is required", ACTOR_ROLE_HEADER),
			})?
			.parse()
			.map_err(|e: String| APIError::Unauthenticated {
				error_type: "INVALID_ROLE".to_string(),
				message: e,
			})?;

		Ok(CurrentActor(Actor::new(id, role)))
	}
}

/// Maps a core error onto its HTTP representation.
pub fn api_error(error: LifecycleError) -> APIError {
	let message = error.to_string();
	match error {
		LifecycleError::Validation(reason) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message: reason,
			details: None,
		},
		LifecycleError::Unauthorized(reason) => APIError::Forbidden {
			error_type: "UNAUTHORIZED".to_string(),
			message: reason,
		},
		LifecycleError::InvalidTransition { from, to, role } => APIError::Conflict {
			error_type: "INVALID_TRANSITION".to_string(),
			message,
			details: Some(json!({
				"from": from,
				"to": to,
				"role": role,
				"allowed": OrderStateMachine::allowed_targets(from, role),
			})),
		},
		LifecycleError::Conflict(reason) => APIError::Conflict {
			error_type: "CONFLICT".to_string(),
			message,
			details: Some(json!({ "reason": reason.as_str() })),
		},
		LifecycleError::IdempotencyKeyRequired => APIError::PreconditionRequired {
			error_type: "IDEMPOTENCY_KEY_REQUIRED".to_string(),
			message: format!("Header {} is required", IDEMPOTENCY_KEY_HEADER),
		},
		LifecycleError::IdempotencyKeyReuse => APIError::UnprocessableEntity {
			error_type: "IDEMPOTENCY_KEY_REUSE".to_string(),
			message,
			details: None,
		},
		LifecycleError::Timeout(_) => APIError::ServiceUnavailable {
			error_type: "TIMEOUT".to_string(),
			message,
			retry_after: Some(TIMEOUT_RETRY_AFTER),
		},
		LifecycleError::NotFound(what) => APIError::NotFound {
			error_type: "NOT_FOUND".to_string(),
			message: format!("Not found: {}", what),
		},
		LifecycleError::Unavailable(detail) => {
			tracing::error!(error = %detail, "Storage unavailable");
			APIError::ServiceUnavailable {
				error_type: "SERVICE_UNAVAILABLE".to_string(),
				message: "Service temporarily unavailable".to_string(),
				retry_after: Some(UNAVAILABLE_RETRY_AFTER),
			}
		},
	}
}

/// Maps a body that failed to deserialize onto a 400.
pub fn bad_body(rejection: JsonRejection) -> APIError {
	APIError::BadRequest {
		error_type: "INVALID_BODY".to_string(),
		message: rejection.body_text(),
		details: None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use delivery_core::ConflictReason;
	use delivery_types::OrderStatus;

	#[test]
	fn test_error_status_mapping() {
		let cases = [
			(LifecycleError::Validation("x".into()), 400),
			(LifecycleError::Unauthorized("x".into()), 403),
			(
				LifecycleError::InvalidTransition {
					from: OrderStatus::Delivered,
					to: OrderStatus::Cancelled,
					role: Role::Admin,
				},
				409,
			),
			(LifecycleError::Conflict(ConflictReason::AlreadyAssigned), 409),
			(LifecycleError::IdempotencyKeyRequired, 428),
			(LifecycleError::IdempotencyKeyReuse, 422),
			(LifecycleError::Timeout("x".into()), 503),
			(LifecycleError::NotFound("x".into()), 404),
			(LifecycleError::Unavailable("x".into()), 503),
		];
		for (error, status) in cases {
			assert_eq!(api_error(error).status_code(), status);
		}
	}

	#[test]
	fn test_invalid_transition_lists_allowed_targets() {
		let response = api_error(LifecycleError::InvalidTransition {
			from: OrderStatus::Confirmed,
			to: OrderStatus::Confirmed,
			role: Role::Admin,
		})
		.to_error_response();
		let details = response.details.unwrap();
		assert_eq!(details["allowed"], json!(["CANCELLED"]));
		assert_eq!(details["from"], json!("CONFIRMED"));
	}

	#[test]
	fn test_unavailable_hides_internal_detail() {
		let response =
			api_error(LifecycleError::Unavailable("disk /var/data full".into())).to_error_response();
		assert!(!response.message.contains("/var/data"));
		assert_eq!(response.retry_after, Some(UNAVAILABLE_RETRY_AFTER));
	}
}
