//! HTTP server assembly
//!
//! Builds the full router (system, sync, internal, legacy routes plus
//! middleware) and runs it. CORS is driven by `ALLOWED_ORIGINS`; the
//! security header trio is applied to every response including errors.

use crate::api::{handlers, headers, routes};
use crate::constants::MAX_PUSH_PAYLOAD_BYTES;
use crate::core::app_state::AppState;
use crate::types::error::{Error, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{middleware, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Creates the main application router with all routes and middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.config.server.allowed_origins);

    Router::new()
        .merge(routes::create_system_routes())
        .merge(routes::create_sync_routes())
        .merge(routes::create_internal_routes())
        .merge(routes::create_legacy_routes())
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(headers::security_headers))
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_PUSH_PAYLOAD_BYTES + 64 * 1024)),
        )
        .with_state(state)
}

/// CORS layer from the configured origin list; no origins, no CORS.
fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(parsed)
}

/// Start the HTTP server and serve until the task is cancelled.
pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.server.http_addr;
    info!("Starting delta-sync gateway on {addr}");

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(Error::Io)?;

    info!("Listening on http://{addr}");
    info!("Health check available at http://{addr}/health");

    axum::serve(listener, app).await.map_err(Error::Io)?;

    Ok(())
}
