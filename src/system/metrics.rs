//! Metrics collection and monitoring for the gateway
//!
//! This module provides high-performance metrics collection using Prometheus,
//! optimized for minimal overhead during normal operations.

use crate::types::error::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Registry, TextEncoder,
};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Sync operation counters
pub struct SyncMetrics {
    /// Deltas accepted by push handlers
    pub deltas_pushed: IntCounter,
    /// Deltas returned by pull handlers
    pub deltas_pulled: IntCounter,
    /// Duplicate deltas dropped on push
    pub deltas_deduped: IntCounter,
    /// Pushes rejected with backpressure
    pub pushes_backpressured: IntCounter,
}

/// Flush engine counters
pub struct FlushMetrics {
    /// Successful flushes
    pub flushes_completed: IntCounter,
    /// Failed flushes (buffer restored)
    pub flushes_failed: IntCounter,
    /// Bytes written to the lake
    pub bytes_flushed: IntCounter,
}

/// Connection counters
pub struct ConnectionMetrics {
    /// WebSocket sessions currently attached
    pub ws_active: IntGauge,
    /// WebSocket sessions accepted in total
    pub ws_accepted: IntCounter,
    /// Broadcast frames sent to peers
    pub broadcasts_sent: IntCounter,
    /// API calls served
    pub api_calls: IntCounter,
}

/// Centralized metrics collection
pub struct Metrics {
    /// Sync operation counters
    pub sync: SyncMetrics,
    /// Flush engine counters
    pub flush: FlushMetrics,
    /// Connection counters
    pub connections: ConnectionMetrics,
}

impl Metrics {
    fn new() -> Result<Self> {
        Ok(Self {
            sync: SyncMetrics {
                deltas_pushed: register_int_counter_with_registry!(
                    "lg_deltas_pushed_total",
                    "Total deltas accepted by push handlers",
                    REGISTRY.clone()
                )?,
                deltas_pulled: register_int_counter_with_registry!(
                    "lg_deltas_pulled_total",
                    "Total deltas returned by pull handlers",
                    REGISTRY.clone()
                )?,
                deltas_deduped: register_int_counter_with_registry!(
                    "lg_deltas_deduped_total",
                    "Total duplicate deltas dropped on push",
                    REGISTRY.clone()
                )?,
                pushes_backpressured: register_int_counter_with_registry!(
                    "lg_pushes_backpressured_total",
                    "Total pushes rejected with backpressure",
                    REGISTRY.clone()
                )?,
            },
            flush: FlushMetrics {
                flushes_completed: register_int_counter_with_registry!(
                    "lg_flushes_completed_total",
                    "Total successful buffer flushes",
                    REGISTRY.clone()
                )?,
                flushes_failed: register_int_counter_with_registry!(
                    "lg_flushes_failed_total",
                    "Total failed buffer flushes",
                    REGISTRY.clone()
                )?,
                bytes_flushed: register_int_counter_with_registry!(
                    "lg_bytes_flushed_total",
                    "Total bytes written to the object store by flushes",
                    REGISTRY.clone()
                )?,
            },
            connections: ConnectionMetrics {
                ws_active: register_int_gauge_with_registry!(
                    "lg_ws_active",
                    "WebSocket sessions currently attached",
                    REGISTRY.clone()
                )?,
                ws_accepted: register_int_counter_with_registry!(
                    "lg_ws_accepted_total",
                    "Total WebSocket sessions accepted",
                    REGISTRY.clone()
                )?,
                broadcasts_sent: register_int_counter_with_registry!(
                    "lg_broadcasts_sent_total",
                    "Total broadcast frames sent",
                    REGISTRY.clone()
                )?,
                api_calls: register_int_counter_with_registry!(
                    "lg_api_calls_total",
                    "Total API calls served",
                    REGISTRY.clone()
                )?,
            },
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> = Lazy::new(|| {
            Metrics::new().expect("Failed to initialize metrics")
        });
        &INSTANCE
    }
}

/// Render the registry in Prometheus text exposition format.
pub fn gather() -> Result<String> {
    // Touch the instance so gauges exist even before first use.
    let _ = Metrics::global();
    let encoder = TextEncoder::new();
    let mut out = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
