//! Bearer authentication for the HTTP surface
//!
//! An [`Authed`] extractor pulls the bearer token (header first, then
//! the `token` query parameter so browser WebSocket clients can
//! authenticate), verifies it against the configured secrets, and hands
//! handlers the resolved claims. Role and gateway-binding checks are
//! small helpers on top.

use crate::api::error::ApiError;
use crate::core::app_state::AppState;
use crate::types::claims::ResolvedClaims;
use crate::types::error::Error;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;

/// Extractor: the verified claims of the calling client.
#[derive(Debug, Clone)]
pub struct Authed(pub ResolvedClaims);

/// Pull the compact token out of a request: `Authorization: Bearer`
/// first, then the `token` query parameter.
fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        let value = header.to_str().ok()?;
        let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
        return Some(token.trim().to_string());
    }
    let query = parts.uri.query()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value.to_string());
        }
    }
    None
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Authed {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)
            .ok_or_else(|| Error::auth("Missing bearer token"))?;
        let claims = crate::auth::verify_token(&token, &state.keys)?;
        Ok(Authed(claims))
    }
}

impl Authed {
    /// Reject non-admin callers.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(Error::forbidden("admin role required").into())
        }
    }

    /// Reject tokens bound to a different gateway.
    pub fn require_gateway(&self, gateway_id: &str) -> Result<(), ApiError> {
        if self.0.gateway_id == gateway_id {
            Ok(())
        } else {
            Err(Error::forbidden(format!(
                "token is bound to gateway {}, not {gateway_id}",
                self.0.gateway_id
            ))
            .into())
        }
    }
}
