//! Error translation at the HTTP boundary
//!
//! The core speaks error kinds; this module maps each kind to exactly
//! one status code and a `{error, code}` JSON body. Nothing below the
//! API layer knows about HTTP statuses.

use crate::types::error::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wrapper turning core errors into HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Status code for a core error kind.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::ClockDrift(_) => StatusCode::CONFLICT,
        Error::SchemaMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Validation(_) | Error::Json(_) | Error::Protocol(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_)
        | Error::FlushFailed(_)
        | Error::Adapter(_)
        | Error::Internal(_)
        | Error::Io(_)
        | Error::MsgPackEncode(_)
        | Error::MsgPackDecode(_)
        | Error::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::auth("x")), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&Error::forbidden("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&Error::clock_drift("x")), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&Error::schema_mismatch("x")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&Error::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::PayloadTooLarge { size: 2_000_000, max: 1_048_576 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(status_for(&Error::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&Error::Backpressure { buffered: 1, watermark: 1 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&Error::conflict("rows")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
