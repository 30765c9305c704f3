//! Driver endpoints.

use super::{api_error, bad_body, CurrentActor};
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, Query, State},
	response::Json,
};
use delivery_core::parse_status;
use delivery_types::{
	APIError, DeliveryHistoryQuery, DriverStats, Order, OrderListResponse, UpdateStatusRequest,
};

/// Entries returned by the delivery history when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// GET /api/drivers/available-orders
pub async fn available_orders(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
) -> Result<Json<OrderListResponse>, APIError> {
	let orders = state
		.engine
		.lifecycle()
		.available_orders(&actor)
		.await
		.map_err(api_error)?;
	Ok(Json(orders.into()))
}

/// POST /api/drivers/orders/{id}/accept
pub async fn accept_order(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	let order = state
		.engine
		.lifecycle()
		.attempt_accept(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(Json(order))
}

/// POST /api/drivers/orders/{id}/status
pub async fn update_status(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
	payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Order>, APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let target = parse_status(&request.status).map_err(api_error)?;
	let order = state
		.engine
		.lifecycle()
		.advance_status(&actor, &id, target)
		.await
		.map_err(api_error)?;
	Ok(Json(order))
}

/// GET /api/drivers/me/deliveries?status=&limit=
pub async fn my_deliveries(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Query(query): Query<DeliveryHistoryQuery>,
) -> Result<Json<OrderListResponse>, APIError> {
	let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
	let orders = state
		.engine
		.lifecycle()
		.driver_deliveries(&actor, query.status.as_deref(), Some(limit))
		.await
		.map_err(api_error)?;
	Ok(Json(orders.into()))
}

/// GET /api/drivers/me/stats
pub async fn my_stats(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
) -> Result<Json<DriverStats>, APIError> {
	let stats = state
		.engine
		.lifecycle()
		.driver_stats(&actor)
		.await
		.map_err(api_error)?;
	Ok(Json(stats))
}
