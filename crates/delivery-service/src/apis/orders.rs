//! Customer order endpoints.

use super::{api_error, bad_body, CurrentActor, IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_REPLAYED_HEADER};
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
	response::{IntoResponse, Json, Response},
};
use delivery_types::{APIError, CreateOrderRequest, Order, OrderListResponse};

/// POST /api/orders
///
/// Replays of a stored response carry the same status and body plus
/// `X-Idempotency-Replayed: true`.
pub async fn create_order(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	headers: HeaderMap,
	payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Response, APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let idempotency_key = headers
		.get(IDEMPOTENCY_KEY_HEADER)
		.and_then(|value| value.to_str().ok());

	let outcome = state
		.engine
		.lifecycle()
		.create_order(&actor, request.items, idempotency_key)
		.await
		.map_err(api_error)?;

	let mut response = (StatusCode::CREATED, Json(outcome.value)).into_response();
	if outcome.replayed {
		response.headers_mut().insert(
			HeaderName::from_static(IDEMPOTENCY_REPLAYED_HEADER),
			HeaderValue::from_static("true"),
		);
	}
	Ok(response)
}

/// GET /api/orders/me
pub async fn my_orders(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
) -> Result<Json<OrderListResponse>, APIError> {
	let orders = state
		.engine
		.lifecycle()
		.customer_orders(&actor)
		.await
		.map_err(api_error)?;
	Ok(Json(orders.into()))
}

/// GET /api/orders/{id}
pub async fn get_order(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	match state.engine.lifecycle().get_order(&actor, &id).await {
		Ok(order) => Ok(Json(order)),
		Err(e) => {
			tracing::warn!("Order retrieval failed: {}", e);
			Err(api_error(e))
		},
	}
}
