//! API types for the marketplace HTTP surface.
//!
//! This module defines the request and response bodies of the HTTP
//! endpoints together with the structured error returned on failure.

use crate::{NewOrderItem, Order};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request body for `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	pub items: Vec<NewOrderItem>,
}

/// Request body for `POST /api/drivers/orders/{id}/status`.
///
/// The status is kept as a string so an unknown value is reported as a
/// validation failure rather than a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
	pub status: String,
}

/// Request body for `PUT /api/products/{id}/price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePriceRequest {
	pub price: Decimal,
}

/// Request body for `POST /api/products/{id}/restock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockRequest {
	pub quantity: u32,
}

/// Query string for `GET /api/admin/orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
	pub status: Option<String>,
}

/// Query string for `GET /api/drivers/me/deliveries`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryHistoryQuery {
	pub status: Option<String>,
	/// Most recent entries to return. Defaults to 50.
	pub limit: Option<usize>,
}

/// Response listing orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
	pub orders: Vec<Order>,
	pub count: usize,
}

impl From<Vec<Order>> for OrderListResponse {
	fn from(orders: Vec<Order>) -> Self {
		Self {
			count: orders.len(),
			orders,
		}
	}
}

/// Response for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
	pub status: String,
	pub service: String,
	/// RFC 3339 time the response was produced.
	pub timestamp: String,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed or invalid input (400)
	BadRequest {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Caller identity missing or malformed (401)
	Unauthenticated { error_type: String, message: String },
	/// Caller lacks the role or ownership for the action (403)
	Forbidden { error_type: String, message: String },
	/// Resource does not exist or is not visible to the caller (404)
	NotFound { error_type: String, message: String },
	/// Request lost a race or hit an invalid state (409)
	Conflict {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Request is well-formed but rejected, e.g. key reuse (422)
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Required precondition header missing (428)
	PreconditionRequired { error_type: String, message: String },
	/// Service unavailable with optional retry information (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Unauthenticated { .. } => 401,
			APIError::Forbidden { .. } => 403,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::PreconditionRequired { .. } => 428,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message, details, retry_after) = match self {
			APIError::BadRequest {
				error_type,
				message,
				details,
			}
			| APIError::Conflict {
				error_type,
				message,
				details,
			}
			| APIError::UnprocessableEntity {
				error_type,
				message,
				details,
			} => (error_type, message, details.clone(), None),
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => (error_type, message, None, *retry_after),
			APIError::Unauthenticated {
				error_type,
				message,
			}
			| APIError::Forbidden {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::PreconditionRequired {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message, None, None),
		};
		ErrorResponse {
			error: error.clone(),
			message: message.clone(),
			details,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{} ({}): {}", response.error, self.status_code(), response.message)
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		let mut response = (status, Json(self.to_error_response())).into_response();
		if let APIError::ServiceUnavailable {
			retry_after: Some(secs),
			..
		} = self
		{
			if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
				response
					.headers_mut()
					.insert(axum::http::header::RETRY_AFTER, value);
			}
		}
		response
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_response_shape() {
		let err = APIError::ServiceUnavailable {
			error_type: "SERVICE_UNAVAILABLE".to_string(),
			message: "Try again later".to_string(),
			retry_after: Some(1),
		};
		assert_eq!(err.status_code(), 503);

		let body = serde_json::to_value(err.to_error_response()).unwrap();
		assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
		assert_eq!(body["retryAfter"], 1);
		assert!(body["details"].is_null());
	}
}
