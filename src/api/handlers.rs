//! HTTP request handlers for the sync and admin surface
//!
//! Public routes authenticate, enforce bindings, then either serve the
//! local gateway session or hand the request to the shard router.
//! Internal routes are the fan-out targets: they skip authentication
//! (the edge already verified the caller) and talk straight to the
//! session registry.

use crate::api::auth::Authed;
use crate::api::error::{ApiError, ApiResult};
use crate::api::headers::{X_AUTH_CLAIMS, X_CLIENT_ID};
use crate::clock::Hlc;
use crate::constants::{MAX_PUSH_PAYLOAD_BYTES, MAX_PULL_LIMIT};
use crate::core::app_state::AppState;
use crate::delta::codec::{encode_body, SyncPull, SyncPush, SyncResponse};
use crate::gateway::GatewaySession;
use crate::shard::router::{PushAck, UpstreamError, X_CHECKPOINT_HLC};
use crate::shard::BroadcastPayload;
use crate::storage::checkpoint::load_checkpoint;
use crate::system::metrics::Metrics;
use crate::system::usage::UsageEvent;
use crate::types::claims::ResolvedClaims;
use crate::types::error::Error;
use crate::types::rules::SyncRules;
use crate::types::schema::TableSchema;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Query parameters of a pull.
#[derive(Debug, Deserialize)]
pub struct PullQuery {
    /// Exclusive lower HLC bound, as a decimal string
    pub since: Option<String>,
    /// Pulling client; defaults to the token subject
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    /// Page size, capped server-side
    pub limit: Option<usize>,
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics`
pub async fn metrics() -> ApiResult<String> {
    Ok(crate::system::metrics::gather()?)
}

fn parse_json_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    if body.len() > MAX_PUSH_PAYLOAD_BYTES {
        return Err(Error::PayloadTooLarge {
            size: body.len(),
            max: MAX_PUSH_PAYLOAD_BYTES,
        }
        .into());
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::validation(format!("Invalid JSON body: {e}")).into())
}

fn upstream_response(err: UpstreamError) -> Response {
    match err {
        UpstreamError::Status { status, body } => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, body).into_response()
        }
        UpstreamError::Transport(msg) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": msg, "code": "UPSTREAM" })),
        )
            .into_response(),
    }
}

fn record_api_call(state: &AppState, gateway_id: &str) {
    Metrics::global().connections.api_calls.inc();
    state.usage.record(gateway_id, UsageEvent::ApiCall, 1);
}

/// Run a flush on its own task so a cancelled request can never abandon
/// the buffer mid-snapshot; the flush always completes to success or
/// failure.
async fn flush_detached(session: Arc<GatewaySession>) -> ApiResult<()> {
    tokio::spawn(async move { session.flush().await })
        .await
        .map_err(|e| Error::internal(format!("flush task failed: {e}")))??;
    Ok(())
}

/// Push one batch into a session and fan the result out to its sockets.
async fn push_to_session(
    session: &Arc<GatewaySession>,
    push: SyncPush,
) -> ApiResult<PushAck> {
    let client_id = push.client_id.clone();
    let outcome = session.handle_push(push).await?;
    if !outcome.deltas.is_empty() {
        let session = session.clone();
        let deltas = outcome.deltas.clone();
        let server_hlc = outcome.server_hlc;
        tokio::spawn(async move {
            session
                .broadcast(&deltas, server_hlc, None, Some(&client_id))
                .await;
        });
    }
    Ok(PushAck { accepted: outcome.accepted, server_hlc: outcome.server_hlc })
}

/// `POST /v1/sync/:gatewayId/push`
pub async fn sync_push(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
    body: Bytes,
) -> ApiResult<Response> {
    record_api_call(&state, &gateway_id);
    let push: SyncPush = parse_json_body(&body)?;
    if push.client_id.is_empty() {
        return Err(Error::validation("clientId must be non-empty").into());
    }
    if push.client_id != authed.0.client_id {
        return Err(Error::forbidden("Client ID mismatch").into());
    }

    if let Some(router) = &state.router {
        return match router.sharded_push(push).await {
            Ok(ack) => Ok(Json(ack).into_response()),
            Err(err) => Ok(upstream_response(err)),
        };
    }

    authed.require_gateway(&gateway_id)?;
    let session = state.registry.get_or_create(&gateway_id);
    let ack = push_to_session(&session, push).await?;
    Ok(Json(ack).into_response())
}

fn pull_from_query(query: &PullQuery, fallback_client: &str) -> ApiResult<SyncPull> {
    let since_hlc = match &query.since {
        Some(raw) => raw.parse::<Hlc>()?,
        None => Hlc::ZERO,
    };
    Ok(SyncPull {
        client_id: query
            .client_id
            .clone()
            .unwrap_or_else(|| fallback_client.to_string()),
        since_hlc,
        max_deltas: query.limit.map(|l| l.min(MAX_PULL_LIMIT)),
    })
}

/// `GET /v1/sync/:gatewayId/pull`
pub async fn sync_pull(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
    Query(query): Query<PullQuery>,
) -> ApiResult<Response> {
    record_api_call(&state, &gateway_id);
    let pull = pull_from_query(&query, &authed.0.client_id)?;

    if let Some(router) = &state.router {
        let mut forwarded = format!(
            "since={}&clientId={}",
            pull.since_hlc, pull.client_id
        );
        if let Some(limit) = pull.max_deltas {
            forwarded.push_str(&format!("&limit={limit}"));
        }
        let claims_json = serde_json::to_string(&authed.0.custom_claims).map_err(Error::from)?;
        let merged = router
            .sharded_pull(&forwarded, &authed.0.client_id, &claims_json)
            .await;
        return Ok(Json(merged).into_response());
    }

    authed.require_gateway(&gateway_id)?;
    let session = state.registry.get_or_create(&gateway_id);
    let response = session.handle_pull(pull, Some(&authed.0)).await?;
    Ok(Json(response).into_response())
}

/// Build the binary checkpoint response.
fn checkpoint_response(body: Bytes, snapshot_hlc: Hlc) -> Response {
    (
        StatusCode::OK,
        [
            ("content-type", "application/octet-stream".to_string()),
            (X_CHECKPOINT_HLC, snapshot_hlc.to_string()),
        ],
        body,
    )
        .into_response()
}

/// `GET /v1/sync/:gatewayId/checkpoint`
pub async fn sync_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
) -> ApiResult<Response> {
    record_api_call(&state, &gateway_id);

    if let Some(router) = &state.router {
        return match router.sharded_checkpoint().await {
            Ok((body, hlc)) => Ok(checkpoint_response(body, hlc)),
            Err(err) => Ok(upstream_response(err)),
        };
    }

    authed.require_gateway(&gateway_id)?;
    let checkpoint = load_checkpoint(state.registry.store().as_ref(), &gateway_id).await?;
    let body = encode_body(&SyncResponse {
        deltas: checkpoint.deltas,
        server_hlc: checkpoint.snapshot_hlc,
        has_more: false,
    })?;
    Ok(checkpoint_response(body, checkpoint.snapshot_hlc))
}

/// `POST /v1/admin/flush/:gatewayId`
pub async fn admin_flush(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
) -> ApiResult<Response> {
    record_api_call(&state, &gateway_id);
    authed.require_admin()?;

    if let Some(router) = &state.router {
        return match router.sharded_admin("flush", Bytes::new()).await {
            Ok(ack) => Ok(Json(ack).into_response()),
            Err(err) => Ok(upstream_response(err)),
        };
    }

    let session = state.registry.get_or_create(&gateway_id);
    flush_detached(session).await?;
    Ok(Json(json!({ "flushed": true })).into_response())
}

/// `POST /v1/admin/schema/:gatewayId`
pub async fn admin_schema(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
    body: Bytes,
) -> ApiResult<Response> {
    record_api_call(&state, &gateway_id);
    authed.require_admin()?;

    if let Some(router) = &state.router {
        return match router.sharded_admin("schema", body).await {
            Ok(ack) => Ok(Json(ack).into_response()),
            Err(err) => Ok(upstream_response(err)),
        };
    }

    let schema: TableSchema = parse_json_body(&body)?;
    let session = state.registry.get_or_create(&gateway_id);
    session.save_schema(schema).await?;
    Ok(Json(json!({ "applied": true })).into_response())
}

/// `POST /v1/admin/sync-rules/:gatewayId`
pub async fn admin_sync_rules(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
    body: Bytes,
) -> ApiResult<Response> {
    record_api_call(&state, &gateway_id);
    authed.require_admin()?;

    if let Some(router) = &state.router {
        return match router.sharded_admin("sync-rules", body).await {
            Ok(ack) => Ok(Json(ack).into_response()),
            Err(err) => Ok(upstream_response(err)),
        };
    }

    let rules: SyncRules = parse_json_body(&body)?;
    let session = state.registry.get_or_create(&gateway_id);
    session.save_sync_rules(rules).await?;
    Ok(Json(json!({ "applied": true })).into_response())
}

/// Legacy `/sync/...` redirects 301 to the `/v1` equivalent.
pub async fn legacy_redirect(Path(rest): Path<String>) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [("location", format!("/v1/sync/{rest}"))],
    )
        .into_response()
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "code": "NOT_FOUND" })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Internal fan-out targets
// ---------------------------------------------------------------------------

/// Claims reconstructed from forwarded identity headers.
fn claims_from_headers(headers: &HeaderMap, gateway_id: &str) -> Option<ResolvedClaims> {
    let client_id = headers.get(X_CLIENT_ID)?.to_str().ok()?.to_string();
    let custom_claims = headers
        .get(X_AUTH_CLAIMS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_str(v).ok())
        .unwrap_or_default();
    Some(ResolvedClaims {
        client_id,
        gateway_id: gateway_id.to_string(),
        role: "client".to_string(),
        custom_claims,
    })
}

/// `POST /internal/gateway/:gatewayId/push`
pub async fn internal_push(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<PushAck>> {
    let push: SyncPush = parse_json_body(&body)?;
    let session = state.registry.get_or_create(&gateway_id);
    let ack = push_to_session(&session, push).await?;
    Ok(Json(ack))
}

/// `GET /internal/gateway/:gatewayId/pull`
pub async fn internal_pull(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<PullQuery>,
) -> ApiResult<Json<SyncResponse>> {
    let claims = claims_from_headers(&headers, &gateway_id);
    let pull = pull_from_query(&query, claims.as_ref().map_or("", |c| &c.client_id))?;
    let session = state.registry.get_or_create(&gateway_id);
    let response = session.handle_pull(pull, claims.as_ref()).await?;
    Ok(Json(response))
}

/// `GET /internal/gateway/:gatewayId/checkpoint`
pub async fn internal_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
) -> ApiResult<Response> {
    let checkpoint = load_checkpoint(state.registry.store().as_ref(), &gateway_id).await?;
    let body = encode_body(&SyncResponse {
        deltas: checkpoint.deltas,
        server_hlc: checkpoint.snapshot_hlc,
        has_more: false,
    })?;
    Ok(checkpoint_response(body, checkpoint.snapshot_hlc))
}

/// `POST /internal/gateway/:gatewayId/admin/:action`
pub async fn internal_admin(
    State(state): State<Arc<AppState>>,
    Path((gateway_id, action)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let session = state.registry.get_or_create(&gateway_id);
    match action.as_str() {
        "flush" => {
            flush_detached(session).await?;
            Ok(Json(json!({ "flushed": true })).into_response())
        }
        "schema" => {
            let schema: TableSchema = parse_json_body(&body)?;
            session.save_schema(schema).await?;
            Ok(Json(json!({ "applied": true })).into_response())
        }
        "sync-rules" => {
            let rules: SyncRules = parse_json_body(&body)?;
            session.save_sync_rules(rules).await?;
            Ok(Json(json!({ "applied": true })).into_response())
        }
        other => Err(Error::not_found(format!("unknown admin action: {other}")).into()),
    }
}

/// `POST /internal/gateway/:gatewayId/broadcast`
///
/// Receives peer deltas from another shard and fans them out to this
/// gateway's sockets. The deltas are not buffered here; receiving
/// clients LWW-merge them like any other peer delta.
pub async fn internal_broadcast(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let payload: BroadcastPayload = parse_json_body(&body)?;
    let session = state.registry.get_or_create(&gateway_id);
    let delivered = session
        .broadcast(
            &payload.deltas,
            payload.server_hlc,
            None,
            payload.exclude_client_id.as_deref(),
        )
        .await;
    Ok(Json(json!({ "delivered": delivered })))
}
