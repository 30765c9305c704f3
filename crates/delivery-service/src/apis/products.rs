//! Catalog endpoints.

use super::{api_error, bad_body, CurrentActor};
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::StatusCode,
	response::Json,
};
use delivery_types::{
	APIError, NewProduct, Product, RestockRequest, UpdatePriceRequest, UpdateProduct,
};

/// POST /api/products
pub async fn add_product(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let product = state
		.engine
		.catalog()
		.add_product(&actor, request)
		.await
		.map_err(api_error)?;
	Ok((StatusCode::CREATED, Json(product)))
}

/// GET /api/products
pub async fn list_products(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Product>>, APIError> {
	let products = state
		.engine
		.catalog()
		.list_products(&actor)
		.await
		.map_err(api_error)?;
	Ok(Json(products))
}

/// GET /api/products/{id}
pub async fn get_product(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<Json<Product>, APIError> {
	let product = state
		.engine
		.catalog()
		.get_product(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(Json(product))
}

/// PUT /api/products/{id}
pub async fn update_product(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
	payload: Result<Json<UpdateProduct>, JsonRejection>,
) -> Result<Json<Product>, APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let product = state
		.engine
		.catalog()
		.update_product(&actor, &id, request)
		.await
		.map_err(api_error)?;
	Ok(Json(product))
}

/// DELETE /api/products/{id}
pub async fn delete_product(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<StatusCode, APIError> {
	state
		.engine
		.catalog()
		.delete_product(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/products/{id}/price
pub async fn update_price(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
	payload: Result<Json<UpdatePriceRequest>, JsonRejection>,
) -> Result<Json<Product>, APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let product = state
		.engine
		.catalog()
		.update_price(&actor, &id, request.price)
		.await
		.map_err(api_error)?;
	Ok(Json(product))
}

/// POST /api/products/{id}/restock
pub async fn restock(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
	payload: Result<Json<RestockRequest>, JsonRejection>,
) -> Result<Json<Product>, APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let product = state
		.engine
		.catalog()
		.restock(&actor, &id, request.quantity)
		.await
		.map_err(api_error)?;
	Ok(Json(product))
}
