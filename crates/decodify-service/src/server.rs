//! HTTP server for the decodify API.

use axum::{
	extract::Request,
	middleware,
	response::Json,
	routing::get,
	Router,
};
use decodify_config::ApiConfig;
use decodify_core::Decodify;
use decodify_types::{ApiError, WelcomeResponse};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::{Layer, ServiceBuilder};
use tower_http::{
	cors::CorsLayer,
	normalize_path::{NormalizePath, NormalizePathLayer},
	trace::TraceLayer,
};

use crate::apis::transactions;
use crate::cache::{cache_responses, ResponseCache};

const WELCOME_MESSAGE: &str = "welcome to decodify api";

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub decodify: Arc<Decodify>,
	pub api: ApiConfig,
}

/// Builds the application with all routes and middleware.
///
/// Trailing slashes are trimmed before routing, so `/decode/` and
/// `/decode` hit the same handler and cache entry.
pub fn build_app(state: AppState, cache: ResponseCache) -> NormalizePath<Router> {
	let transaction_routes = Router::new()
		.route(
			"/transactions/{tx_hash}/{chain}/addresses",
			get(transactions::get_addresses),
		)
		.route(
			"/transactions/{tx_hash}/{chain}/decode",
			get(transactions::decode_transaction),
		)
		.route_layer(middleware::from_fn_with_state(cache, cache_responses));

	let router = Router::new()
		.route("/", get(welcome))
		.merge(transaction_routes)
		.fallback(not_found)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(state);

	NormalizePathLayer::trim_trailing_slash().layer(router)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn start_server(
	api_config: ApiConfig,
	decodify: Arc<Decodify>,
	shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let cache = ResponseCache::new(Duration::from_secs(api_config.cache_ttl_seconds));
	let app = build_app(
		AppState {
			decodify,
			api: api_config,
		},
		cache.clone(),
	);

	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!("Decodify API server starting on {}", bind_address);
	let sweeper = cache.start_sweeper();

	let served = axum::serve(
		listener,
		axum::ServiceExt::<Request>::into_make_service(app),
	)
	.with_graceful_shutdown(shutdown)
	.await;

	if let Some(sweeper) = sweeper {
		sweeper.abort();
	}
	Ok(served?)
}

/// Handles GET / requests.
async fn welcome() -> Json<WelcomeResponse> {
	Json(WelcomeResponse {
		message: WELCOME_MESSAGE.to_string(),
	})
}

async fn not_found() -> ApiError {
	ApiError::NotFound("The requested URL was not found on the server".to_string())
}
