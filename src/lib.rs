//! Lakegate - A Multi-Tenant Delta-Sync Gateway
//!
//! Lakegate sits between intermittently-connected clients and a durable
//! lake of column-oriented files. Clients push row-level change records,
//! pull changes they have not yet seen, and receive real-time broadcasts
//! of their peers' changes. Each gateway session totally orders deltas
//! with a hybrid logical clock, merges conflicts column-by-column, and
//! flushes its buffer to the object store as immutable files.
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;

// Main functional modules
pub mod api;
pub mod auth;
pub mod buffer;
pub mod clock;
pub mod delta;
pub mod gateway;
pub mod rules;
pub mod shard;
pub mod storage;
pub mod system;
pub mod types;

// Re-export commonly used items for convenience
pub use crate::clock::{Hlc, HlcClock};
pub use crate::core::{AppState, Config};
pub use crate::types::{Error, Result, RowDelta};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and the metrics registry.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    let _ = system::metrics::Metrics::global();
}
