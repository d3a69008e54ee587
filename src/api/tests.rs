//! End-to-end tests of the HTTP surface in single-gateway mode

use crate::api::create_app;
use crate::auth::{sign_token, JwtKeys, SignOptions};
use crate::clock::Hlc;
use crate::core::{AppState, Config};
use crate::types::delta::{ColumnDelta, DeltaOp, RowDelta};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

const SECRET: &str = "test-secret";

fn test_app() -> Router {
    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.into();
    let state = AppState::from_config(config).unwrap();
    create_app(state)
}

fn keys() -> JwtKeys {
    JwtKeys::new(SECRET, None).unwrap()
}

fn token(client: &str, gateway: &str, role: Option<&str>) -> String {
    let options = SignOptions {
        role: role.map(str::to_string),
        ..SignOptions::default()
    };
    sign_token(&keys(), client, gateway, options).unwrap()
}

fn wall_hlc(offset_ms: i64) -> Hlc {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    Hlc::encode((now + offset_ms) as u64, 0)
}

fn delta_json(row: &str, client: &str, hlc: Hlc) -> Value {
    let delta = RowDelta::new(
        DeltaOp::Insert,
        "tasks",
        row,
        client,
        vec![ColumnDelta {
            column: "title".into(),
            value: Value::String(format!("title-{row}")),
        }],
        hlc,
    );
    serde_json::to_value(delta).unwrap()
}

fn push_request(gateway: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/v1/sync/{gateway}/push"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_open_and_uncached() {
    let app = test_app();
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    assert!(response
        .headers()
        .get("strict-transport-security")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("max-age=31536000"));
    // Health is the one response without the no-store directive.
    assert!(response.headers().get(header::CACHE_CONTROL).is_none());
    let body = body_json(response).await;
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn sync_routes_require_bearer_auth() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::get("/v1/sync/gw1/pull")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn garbage_token_is_401() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::get("/v1/sync/gw1/pull")
                .header(header::AUTHORIZATION, "Bearer not.a.token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn push_then_pull_roundtrip() {
    let app = test_app();
    let token = token("c1", "gw1", None);

    let push_body = json!({
        "clientId": "c1",
        "deltas": [delta_json("r1", "c1", wall_hlc(0))],
        "lastSeenHlc": "0",
    });
    let response = app
        .clone()
        .oneshot(push_request("gw1", &token, push_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let ack = body_json(response).await;
    assert_eq!(ack["accepted"], 1);
    // HLCs render as decimal strings in JSON.
    assert!(ack["serverHlc"].as_str().is_some());

    let response = app
        .oneshot(
            Request::get("/v1/sync/gw1/pull?since=0&clientId=c1")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["deltas"].as_array().unwrap().len(), 1);
    assert_eq!(body["deltas"][0]["rowId"], "r1");
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn duplicate_push_accepts_once() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let delta = delta_json("r1", "c1", wall_hlc(0));
    let body = json!({ "clientId": "c1", "deltas": [delta], "lastSeenHlc": "0" });

    let first = app
        .clone()
        .oneshot(push_request("gw1", &token, body.clone()))
        .await
        .unwrap();
    assert_eq!(body_json(first).await["accepted"], 1);

    let second = app
        .oneshot(push_request("gw1", &token, body))
        .await
        .unwrap();
    assert_eq!(body_json(second).await["accepted"], 0);
}

#[tokio::test]
async fn client_id_mismatch_is_403() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let body = json!({
        "clientId": "someone-else",
        "deltas": [delta_json("r1", "someone-else", wall_hlc(0))],
        "lastSeenHlc": "0",
    });
    let response = app.oneshot(push_request("gw1", &token, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn gateway_binding_is_enforced() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let response = app
        .oneshot(
            Request::get("/v1/sync/other-gw/pull")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn clock_drift_is_409() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let body = json!({
        "clientId": "c1",
        "deltas": [delta_json("r1", "c1", wall_hlc(60_000))],
        "lastSeenHlc": "0",
    });
    let response = app.oneshot(push_request("gw1", &token, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CLOCK_DRIFT");
}

#[tokio::test]
async fn invalid_json_body_is_400() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sync/gw1/push")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_are_role_gated() {
    let app = test_app();
    let client_token = token("c1", "gw1", None);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/admin/flush/gw1")
                .header(header::AUTHORIZATION, format!("Bearer {client_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin_token = token("op", "gw1", Some("admin"));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/admin/flush/gw1")
                .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "flushed": true }));
}

#[tokio::test]
async fn schema_gates_later_pushes() {
    let app = test_app();
    let admin_token = token("op", "gw1", Some("admin"));
    let schema = json!({
        "table": "tasks",
        "columns": [{"name": "done", "type": "boolean"}],
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/admin/schema/gw1")
                .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
                .body(Body::from(schema.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // "title" is a string column the schema does not declare; the shaped
    // delta would be empty, which is a schema mismatch.
    let token = token("c1", "gw1", None);
    let body = json!({
        "clientId": "c1",
        "deltas": [delta_json("r1", "c1", wall_hlc(0))],
        "lastSeenHlc": "0",
    });
    let response = app.oneshot(push_request("gw1", &token, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn sync_rules_filter_pulls() {
    let app = test_app();
    let admin_token = token("op", "gw1", Some("admin"));
    let rules = json!({
        "version": 1,
        "buckets": [{
            "name": "own-rows",
            "tables": [],
            "filters": [{"column": "owner", "op": "eq", "value": "jwt:sub"}],
        }],
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/admin/sync-rules/gw1")
                .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
                .body(Body::from(rules.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let token_c1 = token("c1", "gw1", None);
    let mine = RowDelta::new(
        DeltaOp::Insert,
        "tasks",
        "r1",
        "c1",
        vec![ColumnDelta { column: "owner".into(), value: Value::String("c1".into()) }],
        wall_hlc(0),
    );
    let theirs = RowDelta::new(
        DeltaOp::Insert,
        "tasks",
        "r2",
        "c1",
        vec![ColumnDelta { column: "owner".into(), value: Value::String("c2".into()) }],
        wall_hlc(1),
    );
    let body = json!({
        "clientId": "c1",
        "deltas": [serde_json::to_value(&mine).unwrap(), serde_json::to_value(&theirs).unwrap()],
        "lastSeenHlc": "0",
    });
    let response = app
        .clone()
        .oneshot(push_request("gw1", &token_c1, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/v1/sync/gw1/pull?since=0")
                .header(header::AUTHORIZATION, format!("Bearer {token_c1}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let rows: Vec<&str> = body["deltas"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["rowId"].as_str().unwrap())
        .collect();
    assert_eq!(rows, vec!["r1"]);
}

#[tokio::test]
async fn missing_checkpoint_is_404() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let response = app
        .oneshot(
            Request::get("/v1/sync/gw1/checkpoint")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn legacy_sync_routes_redirect_to_v1() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::get("/sync/gw1/pull")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    let location = response.headers().get(header::LOCATION).unwrap();
    assert_eq!(location, "/v1/sync/gw1/pull");
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let app = test_app();
    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn oversized_push_is_413() {
    let app = test_app();
    let token = token("c1", "gw1", None);
    let filler = "x".repeat(2 * 1024 * 1024);
    let body = json!({ "clientId": "c1", "deltas": [], "lastSeenHlc": "0", "pad": filler });
    let response = app
        .oneshot(push_request("gw1", &token, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn metrics_endpoint_exposes_counters() {
    let app = test_app();
    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("lg_api_calls_total"));
}
