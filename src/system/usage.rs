//! Usage metering sink
//!
//! Fire-and-forget accounting of billable activity. Events are folded
//! into a bounded in-memory aggregator keyed by `(gateway, event,
//! minute)` and drained periodically by a background task; anything
//! still buffered at shutdown is dropped by design.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Kinds of usage events the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEvent {
    /// Deltas accepted by a push
    PushDeltas,
    /// Deltas returned by a pull
    PullDeltas,
    /// Bytes written by a flush
    FlushBytes,
    /// Deltas written by a flush
    FlushDeltas,
    /// One authenticated API call
    ApiCall,
    /// One WebSocket session accepted
    WsConnection,
    /// One action executed on behalf of a client
    ActionExecuted,
}

/// One drained aggregate row, shaped for the control-plane store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Gateway the activity belongs to
    pub gateway_id: String,
    /// Event kind
    pub event_type: UsageEvent,
    /// Accumulated count within the minute
    pub count: u64,
    /// Minute bucket as epoch milliseconds
    pub timestamp: u64,
}

type BucketKey = (String, UsageEvent, u64);

/// Bounded minute-bucketed aggregator.
///
/// When the map grows past its bound the incoming event is dropped;
/// metering is best-effort and must never backpressure the data path.
#[derive(Debug)]
pub struct UsageSink {
    buckets: DashMap<BucketKey, u64>,
    max_buckets: usize,
}

impl UsageSink {
    /// Create a sink bounded at `max_buckets` live aggregates.
    pub fn new(max_buckets: usize) -> Self {
        Self { buckets: DashMap::new(), max_buckets }
    }

    fn minute_now() -> u64 {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ms - ms % 60_000
    }

    /// Record `count` occurrences of an event for a gateway.
    pub fn record(&self, gateway_id: &str, event: UsageEvent, count: u64) {
        if count == 0 {
            return;
        }
        let key = (gateway_id.to_string(), event, Self::minute_now());
        if !self.buckets.contains_key(&key) && self.buckets.len() >= self.max_buckets {
            warn!(gateway_id, ?event, "usage aggregator full, dropping event");
            return;
        }
        *self.buckets.entry(key).or_insert(0) += count;
    }

    /// Drain every aggregate, leaving the sink empty.
    pub fn drain(&self) -> Vec<UsageRecord> {
        let keys: Vec<BucketKey> = self.buckets.iter().map(|e| e.key().clone()).collect();
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(((gateway_id, event_type, timestamp), count)) = self.buckets.remove(&key) {
                records.push(UsageRecord { gateway_id, event_type, count, timestamp });
            }
        }
        records.sort_by(|a, b| {
            (a.timestamp, &a.gateway_id).cmp(&(b.timestamp, &b.gateway_id))
        });
        records
    }

    /// Number of live aggregates.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the sink holds no aggregates.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Spawn the periodic drain task.
///
/// Drained records go to the control-plane endpoint when one is
/// configured, otherwise to the log. Failures are logged and the
/// records dropped; the task never retries.
pub fn spawn_drain_task(
    sink: Arc<UsageSink>,
    endpoint: Option<String>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let records = sink.drain();
            if records.is_empty() {
                continue;
            }
            match &endpoint {
                Some(url) => {
                    if let Err(err) = client.post(url).json(&records).send().await {
                        warn!(%err, dropped = records.len(), "usage drain failed");
                    }
                }
                None => {
                    debug!(records = records.len(), "usage drain (no endpoint configured)");
                }
            }
        }
    })
}
