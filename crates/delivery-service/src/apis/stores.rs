//! Store endpoints.

use super::{api_error, bad_body, CurrentActor};
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::StatusCode,
	response::Json,
};
use delivery_types::{APIError, NewStore, Store, UpdateStore};

/// POST /api/stores
pub async fn add_store(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	payload: Result<Json<NewStore>, JsonRejection>,
) -> Result<(StatusCode, Json<Store>), APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let store = state
		.engine
		.catalog()
		.add_store(&actor, request)
		.await
		.map_err(api_error)?;
	Ok((StatusCode::CREATED, Json(store)))
}

/// GET /api/stores
pub async fn list_stores(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Store>>, APIError> {
	let stores = state
		.engine
		.catalog()
		.list_stores(&actor)
		.await
		.map_err(api_error)?;
	Ok(Json(stores))
}

/// GET /api/stores/{id}
pub async fn get_store(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<Json<Store>, APIError> {
	let store = state
		.engine
		.catalog()
		.get_store(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(Json(store))
}

/// PUT /api/stores/{id}
pub async fn update_store(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
	payload: Result<Json<UpdateStore>, JsonRejection>,
) -> Result<Json<Store>, APIError> {
	let Json(request) = payload.map_err(bad_body)?;
	let store = state
		.engine
		.catalog()
		.update_store(&actor, &id, request)
		.await
		.map_err(api_error)?;
	Ok(Json(store))
}

/// DELETE /api/stores/{id}
pub async fn delete_store(
	State(state): State<AppState>,
	CurrentActor(actor): CurrentActor,
	Path(id): Path<String>,
) -> Result<StatusCode, APIError> {
	state
		.engine
		.catalog()
		.delete_store(&actor, &id)
		.await
		.map_err(api_error)?;
	Ok(StatusCode::NO_CONTENT)
}
