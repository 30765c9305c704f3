//! Admin moderation endpoints.

use super::{api_error, CurrentActor};
use crate::server::AppState;
use axum::{
	extract::{Path, Query, State},
	response::Json,
};
use delivery_types::{APIError, ListOrdersQuery, Order, OrderListResponse};

/// GET /api/admin/orders?status=
pub async fn list_orders(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, APIError> {
	let orders = state
		.engine
		.lifecycle()
		.list_orders(&actor, query.status.as_deref())
		.await
		.map_err(api_error)?;
	Ok(Json(orders.into()))
}

/// POST /api/admin/orders/{id}/confirm
pub async fn confirm_order(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	let order = state
		.engine
		.lifecycle()
		.confirm_order(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(Json(order))
}

/// POST /api/admin/orders/{id}/cancel
pub async fn cancel_order(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	let order = state
		.engine
		.lifecycle()
		.cancel_order(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(Json(order))
}
