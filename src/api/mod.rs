//! HTTP and WebSocket surface

/// Bearer authentication extractor
pub mod auth;

/// Error translation to HTTP
pub mod error;

/// Request handlers
pub mod handlers;

/// Header names and response-header policy
pub mod headers;

/// Route definitions
pub mod routes;

/// Server assembly
pub mod server;

/// WebSocket sessions
pub mod ws;

#[cfg(test)]
mod tests;

pub use error::{ApiError, ApiResult};
pub use server::{create_app, start_server};
