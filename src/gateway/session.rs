//! Per-gateway session
//!
//! One session exists per logical gateway. It owns the HLC clock, the
//! delta buffer, the cached schema and sync rules, the set of attached
//! WebSocket sockets, and the flush retry counter. All buffer-touching
//! operations go through one async mutex, so concurrent pushes, pulls,
//! flushes and alarm handling on the same gateway serialise while
//! different gateways proceed in parallel. Flush snapshots under the
//! lock, releases it for the object-store write, and re-acquires it
//! only to restore on failure.

use crate::buffer::{ApplyOutcome, BufferLimits, DeltaBuffer};
use crate::clock::{Hlc, HlcClock};
use crate::constants::{MAX_DELTAS_PER_PUSH, MAX_PULL_LIMIT, MAX_PUSH_PAYLOAD_BYTES};
use crate::delta::codec::{self, BroadcastMessage, SyncPull, SyncPush, SyncResponse};
use crate::gateway::alarm::{backoff_delay, FlushAlarm};
use crate::rules::{filter_deltas, EvalContext};
use crate::storage::{flush_key, gateway_state_key, columnar, jsonl, ObjectStore};
use crate::system::metrics::Metrics;
use crate::system::usage::{UsageEvent, UsageSink};
use crate::types::claims::ResolvedClaims;
use crate::types::delta::{RowDelta, RowKey};
use crate::types::error::{Error, Result};
use crate::types::rules::SyncRules;
use crate::types::schema::TableSchema;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Durable state attached to one WebSocket, survives worker restarts
/// because it is re-derived from the socket's own storage, never from
/// shared maps.
#[derive(Debug, Clone)]
pub struct SocketAttachment {
    /// Verified claims captured at upgrade time
    pub claims: ResolvedClaims,
    /// Client bound to the socket
    pub client_id: Option<String>,
}

/// A registered socket: its attachment plus the outbound frame queue.
#[derive(Debug)]
struct SocketHandle {
    attachment: SocketAttachment,
    tx: mpsc::UnboundedSender<Bytes>,
}

/// Result of an accepted push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// Input deltas newly represented in the buffer
    pub accepted: usize,
    /// Fresh server HLC observation
    pub server_hlc: Hlc,
    /// The affected rows as finally stored after LWW merging
    pub deltas: Vec<RowDelta>,
}

/// Result of a flush.
#[derive(Debug, Clone)]
pub struct FlushOutcome {
    /// Object key written, empty when the buffer was already empty
    pub key: String,
    /// Deltas written
    pub deltas: usize,
    /// Bytes written
    pub bytes: usize,
}

/// State guarded by the session mutex.
#[derive(Debug)]
struct SessionInner {
    buffer: DeltaBuffer,
    schema: Option<TableSchema>,
    rules: SyncRules,
    flush_retry_count: u32,
    loaded: bool,
}

/// The per-gateway object.
pub struct GatewaySession {
    gateway_id: String,
    clock: HlcClock,
    inner: Mutex<SessionInner>,
    sockets: DashMap<u64, SocketHandle>,
    next_socket_id: AtomicU64,
    store: Arc<dyn ObjectStore>,
    usage: Arc<UsageSink>,
    limits: BufferLimits,
    alarm: FlushAlarm,
}

impl GatewaySession {
    /// Create the session and spawn its alarm task.
    pub fn spawn(
        gateway_id: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        usage: Arc<UsageSink>,
        limits: BufferLimits,
    ) -> Arc<Self> {
        let (alarm, rx) = FlushAlarm::new();
        let session = Arc::new(Self {
            gateway_id: gateway_id.into(),
            clock: HlcClock::new(),
            inner: Mutex::new(SessionInner {
                buffer: DeltaBuffer::new(),
                schema: None,
                rules: SyncRules::permit_all(),
                flush_retry_count: 0,
                loaded: false,
            }),
            sockets: DashMap::new(),
            next_socket_id: AtomicU64::new(1),
            store,
            usage,
            limits,
            alarm,
        });
        spawn_alarm_loop(Arc::downgrade(&session), rx);
        session
    }

    /// Gateway this session serves.
    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    fn wall_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Load cached schema and rules from durable storage on first touch.
    ///
    /// A corrupt state object is logged and skipped rather than wedging
    /// the session; the operator can re-save it through the admin API.
    async fn ensure_loaded(&self, inner: &mut SessionInner) {
        if inner.loaded {
            return;
        }
        inner.loaded = true;
        match self
            .store
            .get_object(&gateway_state_key(&self.gateway_id, "tableSchema"))
            .await
        {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(schema) => inner.schema = Some(schema),
                Err(err) => warn!(gateway = %self.gateway_id, %err, "stored schema unreadable"),
            },
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(gateway = %self.gateway_id, %err, "schema load failed"),
        }
        match self
            .store
            .get_object(&gateway_state_key(&self.gateway_id, "syncRules"))
            .await
        {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(rules) => inner.rules = rules,
                Err(err) => warn!(gateway = %self.gateway_id, %err, "stored sync rules unreadable"),
            },
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(gateway = %self.gateway_id, %err, "sync rules load failed"),
        }
    }

    /// Ingest a batch of client deltas.
    ///
    /// The push is atomic: shaping, schema checks and clock observation
    /// run for every delta before the buffer mutates, so a clock-drift
    /// or schema failure leaves no partial state behind.
    pub async fn handle_push(&self, push: SyncPush) -> Result<PushOutcome> {
        if push.deltas.len() > MAX_DELTAS_PER_PUSH {
            return Err(Error::validation(format!(
                "push of {} deltas exceeds limit of {MAX_DELTAS_PER_PUSH}",
                push.deltas.len()
            )));
        }
        let payload_bytes: usize = push.deltas.iter().map(RowDelta::approx_size).sum();
        if payload_bytes > MAX_PUSH_PAYLOAD_BYTES {
            return Err(Error::PayloadTooLarge {
                size: payload_bytes,
                max: MAX_PUSH_PAYLOAD_BYTES,
            });
        }

        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await;

        if inner.buffer.over_watermark(&self.limits) {
            Metrics::global().sync.pushes_backpressured.inc();
            return Err(Error::Backpressure {
                buffered: inner.buffer.stats().byte_size,
                watermark: self.limits.high_watermark_bytes,
            });
        }

        // Shape and validate everything before any mutation.
        let mut shaped = Vec::with_capacity(push.deltas.len());
        for delta in push.deltas {
            let mut delta = delta.normalize()?;
            if delta.client_id != push.client_id {
                return Err(Error::validation(format!(
                    "delta client {} does not match push client {}",
                    delta.client_id, push.client_id
                )));
            }
            if let Some(schema) = &inner.schema {
                delta = schema.apply(delta)?;
            }
            shaped.push(delta);
        }
        for delta in &shaped {
            self.clock.recv(delta.hlc)?;
        }

        let now_ms = Self::wall_ms();
        let mut accepted = 0usize;
        let mut touched: Vec<RowKey> = Vec::new();
        for delta in shaped {
            let key = delta.row_key();
            match inner.buffer.apply(delta, now_ms)? {
                ApplyOutcome::Applied => {
                    accepted += 1;
                    if !touched.contains(&key) {
                        touched.push(key);
                    }
                }
                ApplyOutcome::Duplicate => {
                    Metrics::global().sync.deltas_deduped.inc();
                }
            }
        }

        let stored: Vec<RowDelta> = touched
            .iter()
            .filter_map(|key| inner.buffer.entry(key).cloned())
            .collect();
        let server_hlc = self.clock.now();

        // Schedule the flush: immediately when a threshold tripped,
        // otherwise when the oldest entry would reach its age bound.
        if inner.buffer.should_flush(&self.limits, now_ms) {
            self.alarm.schedule(Instant::now());
        } else if !inner.buffer.is_empty() {
            self.alarm
                .schedule(Instant::now() + Duration::from_millis(self.limits.max_buffer_age_ms));
        }
        drop(inner);

        Metrics::global().sync.deltas_pushed.inc_by(accepted as u64);
        self.usage
            .record(&self.gateway_id, UsageEvent::PushDeltas, accepted as u64);

        Ok(PushOutcome { accepted, server_hlc, deltas: stored })
    }

    /// Serve a pull: buffered deltas newer than the client's watermark,
    /// filtered by the session's sync rules when claims are supplied.
    pub async fn handle_pull(
        &self,
        pull: SyncPull,
        claims: Option<&ResolvedClaims>,
    ) -> Result<SyncResponse> {
        let limit = pull
            .max_deltas
            .unwrap_or(crate::constants::DEFAULT_PULL_LIMIT)
            .min(MAX_PULL_LIMIT);

        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await;
        let (matching, _) = inner.buffer.scan_since(pull.since_hlc, usize::MAX);
        let matching = match claims {
            Some(claims) => filter_deltas(
                matching,
                EvalContext { rules: &inner.rules, claims },
            ),
            None => matching,
        };
        drop(inner);

        let total = matching.len();
        let deltas: Vec<RowDelta> = matching.into_iter().take(limit).collect();
        let server_hlc = self.clock.now();

        Metrics::global().sync.deltas_pulled.inc_by(deltas.len() as u64);
        self.usage
            .record(&self.gateway_id, UsageEvent::PullDeltas, deltas.len() as u64);

        Ok(SyncResponse { has_more: total > deltas.len(), deltas, server_hlc })
    }

    /// Flush the buffer to the object store as one immutable file.
    ///
    /// The snapshot is taken under the lock and the lock released for
    /// the write. On any failure the snapshot is merged back, so the
    /// buffer never loses a delta.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (snapshot, schema) = {
            let mut inner = self.inner.lock().await;
            self.ensure_loaded(&mut inner).await;
            if inner.buffer.is_empty() {
                return Ok(FlushOutcome { key: String::new(), deltas: 0, bytes: 0 });
            }
            (inner.buffer.take_snapshot(), inner.schema.clone())
        };

        let snapshot_hlc = snapshot.snapshot_hlc();
        let count = snapshot.deltas.len();
        let encoded = match &schema {
            Some(schema) => columnar::encode(&snapshot.deltas, schema)
                .map(|bytes| (bytes, columnar::EXT, columnar::CONTENT_TYPE)),
            None => jsonl::encode(&snapshot.deltas)
                .map(|bytes| (bytes, jsonl::EXT, jsonl::CONTENT_TYPE)),
        };
        let (bytes, ext, content_type) = match encoded {
            Ok(parts) => parts,
            Err(err) => return self.fail_flush(snapshot, err.to_string()).await,
        };

        let size = bytes.len();
        let key = flush_key(
            &self.gateway_id,
            snapshot_hlc.as_u64(),
            &Uuid::new_v4().to_string(),
            ext,
        );
        match self.store.put_object(&key, bytes, Some(content_type)).await {
            Ok(()) => {
                let stats = {
                    let mut inner = self.inner.lock().await;
                    inner.flush_retry_count = 0;
                    inner.buffer.stats()
                };
                Metrics::global().flush.flushes_completed.inc();
                Metrics::global().flush.bytes_flushed.inc_by(size as u64);
                self.usage
                    .record(&self.gateway_id, UsageEvent::FlushBytes, size as u64);
                self.usage
                    .record(&self.gateway_id, UsageEvent::FlushDeltas, count as u64);
                info!(
                    gateway = %self.gateway_id,
                    %key,
                    deltas = count,
                    bytes = size,
                    remaining_log = stats.log_size,
                    remaining_bytes = stats.byte_size,
                    "flush complete"
                );
                Ok(FlushOutcome { key, deltas: count, bytes: size })
            }
            Err(err) => self.fail_flush(snapshot, err.to_string()).await,
        }
    }

    /// Restore a failed flush and bump the retry counter.
    async fn fail_flush(
        &self,
        snapshot: crate::buffer::BufferSnapshot,
        message: String,
    ) -> Result<FlushOutcome> {
        let retries = {
            let mut inner = self.inner.lock().await;
            inner.buffer.restore(snapshot);
            inner.flush_retry_count += 1;
            inner.flush_retry_count
        };
        Metrics::global().flush.flushes_failed.inc();
        warn!(gateway = %self.gateway_id, retries, %message, "flush failed, buffer restored");
        Err(Error::FlushFailed(message))
    }

    /// Alarm fire path: drain or back off.
    pub(crate) async fn on_alarm(self: &Arc<Self>) {
        {
            let inner = self.inner.lock().await;
            if inner.buffer.is_empty() {
                return;
            }
        }
        match self.flush().await {
            Ok(_) => {
                let drained = { self.inner.lock().await.buffer.is_empty() };
                if !drained {
                    self.alarm.schedule(Instant::now());
                }
            }
            Err(_) => {
                let retries = { self.inner.lock().await.flush_retry_count };
                self.alarm.schedule(Instant::now() + backoff_delay(retries));
            }
        }
    }

    /// Validate and persist a table schema, then cache it.
    pub async fn save_schema(&self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        let bytes = serde_json::to_vec(&schema)?;
        self.store
            .put_object(
                &gateway_state_key(&self.gateway_id, "tableSchema"),
                Bytes::from(bytes),
                Some("application/json"),
            )
            .await?;
        let mut inner = self.inner.lock().await;
        inner.schema = Some(schema);
        Ok(())
    }

    /// Validate and persist sync rules, then cache them.
    pub async fn save_sync_rules(&self, rules: SyncRules) -> Result<()> {
        rules.validate()?;
        let bytes = serde_json::to_vec(&rules)?;
        self.store
            .put_object(
                &gateway_state_key(&self.gateway_id, "syncRules"),
                Bytes::from(bytes),
                Some("application/json"),
            )
            .await?;
        let mut inner = self.inner.lock().await;
        inner.rules = rules;
        Ok(())
    }

    /// Current sync rules (loading them on first touch).
    pub async fn sync_rules(&self) -> SyncRules {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await;
        inner.rules.clone()
    }

    /// Register an attached socket; returns its id for later removal.
    pub fn accept_socket(
        &self,
        attachment: SocketAttachment,
        tx: mpsc::UnboundedSender<Bytes>,
    ) -> u64 {
        let id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        self.sockets.insert(id, SocketHandle { attachment, tx });
        Metrics::global().connections.ws_accepted.inc();
        Metrics::global().connections.ws_active.inc();
        self.usage
            .record(&self.gateway_id, UsageEvent::WsConnection, 1);
        id
    }

    /// Drop a socket registration.
    pub fn remove_socket(&self, socket_id: u64) {
        if self.sockets.remove(&socket_id).is_some() {
            Metrics::global().connections.ws_active.dec();
        }
    }

    /// Number of attached sockets.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Fan freshly ingested deltas out to attached sockets.
    ///
    /// Each socket sees only what its own claims admit under the
    /// session's rules; sockets with nothing to see are skipped. Send
    /// failures are swallowed, the socket may simply have closed.
    pub async fn broadcast(
        &self,
        deltas: &[RowDelta],
        server_hlc: Hlc,
        exclude_socket: Option<u64>,
        exclude_client: Option<&str>,
    ) -> usize {
        if deltas.is_empty() || self.sockets.is_empty() {
            return 0;
        }
        let rules = self.sync_rules().await;
        let mut sent = 0usize;
        for entry in self.sockets.iter() {
            if exclude_socket == Some(*entry.key()) {
                continue;
            }
            let handle = entry.value();
            if let Some(excluded) = exclude_client {
                if handle.attachment.client_id.as_deref() == Some(excluded) {
                    continue;
                }
            }
            let filtered = filter_deltas(
                deltas.to_vec(),
                EvalContext { rules: &rules, claims: &handle.attachment.claims },
            );
            if filtered.is_empty() {
                continue;
            }
            let frame = match codec::encode_broadcast(&BroadcastMessage {
                deltas: filtered,
                server_hlc,
            }) {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(gateway = %self.gateway_id, %err, "broadcast encode failed");
                    continue;
                }
            };
            if handle.tx.send(frame).is_ok() {
                sent += 1;
            }
        }
        Metrics::global().connections.broadcasts_sent.inc_by(sent as u64);
        sent
    }

    /// Buffer statistics snapshot.
    pub async fn buffer_stats(&self) -> crate::buffer::BufferStats {
        self.inner.lock().await.buffer.stats()
    }
}

/// Alarm task: waits on the pending deadline, fires the session, exits
/// when the session is dropped.
fn spawn_alarm_loop(
    session: Weak<GatewaySession>,
    mut rx: watch::Receiver<Option<Instant>>,
) {
    tokio::spawn(async move {
        loop {
            let deadline = *rx.borrow_and_update();
            match deadline {
                None => {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {
                            let Some(session) = session.upgrade() else { break };
                            session.alarm.clear();
                            session.on_alarm().await;
                        }
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    });
}
