//! HTTP server for the mall delivery API.
//!
//! Routes are nested under `/api`; callers are identified by the gateway
//! headers read in [`crate::apis::CurrentActor`].

use crate::apis::{admin, drivers, orders, products, stores};
use axum::{
	extract::DefaultBodyLimit,
	http::{HeaderName, HeaderValue, Method},
	response::Json,
	routing::{get, post, put},
	Router,
};
use delivery_config::{ApiConfig, CorsConfig};
use delivery_core::MarketplaceEngine;
use delivery_types::HealthResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::{AllowOrigin, Any, CorsLayer},
	timeout::TimeoutLayer,
	trace::TraceLayer,
};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<MarketplaceEngine>,
}

/// Builds the router with all routes and middleware.
pub fn build_router(state: AppState, api_config: &ApiConfig) -> Router {
	let api = Router::new()
		.route("/orders", post(orders::create_order))
		.route("/orders/me", get(orders::my_orders))
		.route("/orders/{id}", get(orders::get_order))
		.route("/admin/orders", get(admin::list_orders))
		.route("/admin/orders/{id}/confirm", post(admin::confirm_order))
		.route("/admin/orders/{id}/cancel", post(admin::cancel_order))
		.route("/drivers/available-orders", get(drivers::available_orders))
		.route("/drivers/orders/{id}/accept", post(drivers::accept_order))
		.route("/drivers/orders/{id}/status", post(drivers::update_status))
		.route("/drivers/me/deliveries", get(drivers::my_deliveries))
		.route("/drivers/me/stats", get(drivers::my_stats))
		.route("/stores", post(stores::add_store).get(stores::list_stores))
		.route(
			"/stores/{id}",
			get(stores::get_store)
				.put(stores::update_store)
				.delete(stores::delete_store),
		)
		.route(
			"/products",
			post(products::add_product).get(products::list_products),
		)
		.route(
			"/products/{id}",
			get(products::get_product)
				.put(products::update_product)
				.delete(products::delete_product),
		)
		.route("/products/{id}/price", put(products::update_price))
		.route("/products/{id}/restock", post(products::restock));

	Router::new()
		.route("/health", get(health))
		.nest("/api", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(api_config.cors.as_ref()))
				.layer(TimeoutLayer::new(Duration::from_secs(
					api_config.timeout_seconds,
				)))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(state)
}

/// Starts the HTTP server for the API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<MarketplaceEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = build_router(AppState { engine }, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Mall delivery API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

async fn health() -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok".to_string(),
		service: "mall-delivery".to_string(),
		timestamp: chrono::Utc::now().to_rfc3339(),
	})
}

fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let mut layer = CorsLayer::new();
	layer = if cors.allowed_origins.iter().any(|origin| origin == "*") {
		layer.allow_origin(Any)
	} else {
		let origins: Vec<HeaderValue> = cors
			.allowed_origins
			.iter()
			.filter_map(|origin| origin.parse().ok())
			.collect();
		layer.allow_origin(AllowOrigin::list(origins))
	};
	layer = if cors.allowed_headers.iter().any(|header| header == "*") {
		layer.allow_headers(Any)
	} else {
		let headers: Vec<HeaderName> = cors
			.allowed_headers
			.iter()
			.filter_map(|header| header.parse().ok())
			.collect();
		layer.allow_headers(headers)
	};
	if cors.allowed_methods.iter().any(|method| method == "*") {
		layer.allow_methods(Any)
	} else {
		let methods: Vec<Method> = cors
			.allowed_methods
			.iter()
			.filter_map(|method| method.parse().ok())
			.collect();
		layer.allow_methods(methods)
	}
}
