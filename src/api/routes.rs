//! Route definitions for the gateway HTTP surface

use crate::api::{handlers, headers, ws};
use crate::core::app_state::AppState;
use axum::routing::{any, get, post};
use axum::{middleware, Router};
use std::sync::Arc;

/// Public sync and admin routes under `/v1`, all with `no-store`.
pub fn create_sync_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/sync/:gateway_id/push", post(handlers::sync_push))
        .route("/v1/sync/:gateway_id/pull", get(handlers::sync_pull))
        .route("/v1/sync/:gateway_id/checkpoint", get(handlers::sync_checkpoint))
        .route("/v1/sync/:gateway_id/ws", get(ws::ws_upgrade))
        .route("/v1/admin/flush/:gateway_id", post(handlers::admin_flush))
        .route("/v1/admin/schema/:gateway_id", post(handlers::admin_schema))
        .route("/v1/admin/sync-rules/:gateway_id", post(handlers::admin_sync_rules))
        .layer(middleware::from_fn(headers::no_store))
}

/// Loopback fan-out targets used by the shard router.
pub fn create_internal_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/internal/gateway/:gateway_id/push", post(handlers::internal_push))
        .route("/internal/gateway/:gateway_id/pull", get(handlers::internal_pull))
        .route(
            "/internal/gateway/:gateway_id/checkpoint",
            get(handlers::internal_checkpoint),
        )
        .route(
            "/internal/gateway/:gateway_id/admin/:action",
            post(handlers::internal_admin),
        )
        .route(
            "/internal/gateway/:gateway_id/broadcast",
            post(handlers::internal_broadcast),
        )
        .layer(middleware::from_fn(headers::no_store))
}

/// Unauthenticated system routes.
pub fn create_system_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
}

/// Legacy unversioned paths, permanently redirected.
pub fn create_legacy_routes() -> Router<Arc<AppState>> {
    Router::new().route("/sync/*rest", any(handlers::legacy_redirect))
}
