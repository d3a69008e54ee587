//! Error types and handling for the delta-sync gateway
//!
//! This module defines all error kinds used across the core,
//! optimized for zero-cost error propagation and clear diagnostics.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway core.
///
/// These are kinds, not transport codes; translation to HTTP status
/// happens once at the API boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Remote HLC wall clock too far ahead of the local physical clock
    #[error("Clock drift: {0}")]
    ClockDrift(String),

    /// LWW resolve called across mismatched row keys
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Push contained columns incompatible with the cached table schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Buffer high-watermark exceeded; caller should flush and retry once
    #[error("Backpressure: buffer at {buffered} bytes (watermark: {watermark})")]
    Backpressure {
        /// Bytes currently buffered
        buffered: usize,
        /// Configured high-watermark in bytes
        watermark: usize,
    },

    /// Flush write to the object store failed; buffer was restored
    #[error("Flush failed: {0}")]
    FlushFailed(String),

    /// Object-store adapter failure
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// JWT malformed, unsupported, invalid signature, or expired
    #[error("Auth error: {0}")]
    Auth(String),

    /// Authenticated but not allowed (client or role mismatch)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or invalid request body, query, or configuration value
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Push payload larger than the accepted ceiling
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Actual payload size in bytes
        size: usize,
        /// Maximum allowed payload size in bytes
        max: usize,
    },

    /// Unknown route or missing resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Wire frame could not be decoded or violated the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization error
    #[error("MessagePack error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization error
    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Object-store adapter errors, kept separate so callers can
/// distinguish a missing key from a failed backend.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Key does not exist in the store
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Backend rejected or failed the operation
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Disk I/O operation failed
    #[error("Disk I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// True when the error is a missing-key miss rather than a backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }
}

impl Error {
    /// Create a clock drift error
    pub fn clock_drift(msg: impl Into<String>) -> Self {
        Self::ClockDrift(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// Create an auth error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable kind for structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ClockDrift(_) => "CLOCK_DRIFT",
            Error::Conflict(_) => "CONFLICT",
            Error::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            Error::Backpressure { .. } => "BACKPRESSURE",
            Error::FlushFailed(_) => "FLUSH_FAILED",
            Error::Adapter(_) => "ADAPTER",
            Error::Auth(_) => "AUTH",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::Validation(_) => "INVALID",
            Error::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Protocol(_) => "PROTOCOL",
            Error::Internal(_) => "INTERNAL",
            Error::Io(_) => "INTERNAL",
            Error::Json(_) => "INVALID",
            Error::MsgPackEncode(_) => "INTERNAL",
            Error::MsgPackDecode(_) => "PROTOCOL",
            Error::Metrics(_) => "INTERNAL",
        }
    }

    /// Check if this is a self-healing error (retried by the flush alarm
    /// or by the pushing connector, never fatal to the session)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Backpressure { .. } | Error::FlushFailed(_))
    }

    /// Check if this is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::ClockDrift(_)
                | Error::SchemaMismatch(_)
                | Error::Auth(_)
                | Error::Forbidden(_)
                | Error::Validation(_)
                | Error::PayloadTooLarge { .. }
                | Error::NotFound(_)
                | Error::Protocol(_)
                | Error::Json(_)
        )
    }

    /// Check if this is a server error (5xx equivalent)
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error() && !matches!(self, Error::Backpressure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::clock_drift("x").kind(), "CLOCK_DRIFT");
        assert_eq!(Error::schema_mismatch("x").kind(), "SCHEMA_MISMATCH");
        assert_eq!(
            Error::Backpressure { buffered: 10, watermark: 5 }.kind(),
            "BACKPRESSURE"
        );
        assert_eq!(
            Error::PayloadTooLarge { size: 2_000_000, max: 1_048_576 }.kind(),
            "PAYLOAD_TOO_LARGE"
        );
        assert_eq!(Error::validation("x").kind(), "INVALID");
    }

    #[test]
    fn test_adapter_not_found() {
        let err = AdapterError::NotFound("checkpoints/gw/manifest.json".into());
        assert!(err.is_not_found());
        let err = AdapterError::Backend("503".into());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(Error::FlushFailed("put failed".into()).is_retryable());
        assert!(Error::Backpressure { buffered: 1, watermark: 1 }.is_retryable());
        assert!(!Error::auth("bad token").is_retryable());
    }
}
