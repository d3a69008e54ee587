//! System utilities: metrics and usage metering

/// Prometheus metrics
pub mod metrics;

/// Usage metering sink
pub mod usage;

pub use metrics::Metrics;
pub use usage::{UsageEvent, UsageRecord, UsageSink};
