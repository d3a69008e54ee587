//! Header names and response-header policy
//!
//! Every response carries the security trio; sync, admin and internal
//! responses additionally refuse caching. Identity verified at the edge
//! travels to shards as `X-Client-Id` and `X-Auth-Claims`.

use axum::http::header::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

/// Verified `sub` of the caller, forwarded on fan-out.
pub const X_CLIENT_ID: &str = "x-client-id";

/// JSON-encoded custom claims of the caller, forwarded on fan-out.
pub const X_AUTH_CLAIMS: &str = "x-auth-claims";

/// Attach the security headers every response must carry.
pub async fn security_headers(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    response
}

/// Attach `Cache-Control: no-store`; layered over sync and admin routes
/// but not over `/health`.
pub async fn no_store(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}
