//! Gateway session registry
//!
//! Sessions are created on first reference and live until operator
//! intervention (process shutdown). The registry is the only shared map
//! in the data path; everything per-gateway hangs off the session.

use crate::buffer::BufferLimits;
use crate::gateway::session::GatewaySession;
use crate::storage::ObjectStore;
use crate::system::usage::UsageSink;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Lazily-populated map of gateway id to live session.
pub struct GatewayRegistry {
    sessions: DashMap<String, Arc<GatewaySession>>,
    store: Arc<dyn ObjectStore>,
    usage: Arc<UsageSink>,
    limits: BufferLimits,
}

impl GatewayRegistry {
    /// Create an empty registry.
    pub fn new(store: Arc<dyn ObjectStore>, usage: Arc<UsageSink>, limits: BufferLimits) -> Self {
        Self { sessions: DashMap::new(), store, usage, limits }
    }

    /// Session for a gateway, created on first reference.
    pub fn get_or_create(&self, gateway_id: &str) -> Arc<GatewaySession> {
        if let Some(session) = self.sessions.get(gateway_id) {
            return session.clone();
        }
        self.sessions
            .entry(gateway_id.to_string())
            .or_insert_with(|| {
                info!(gateway = gateway_id, "creating gateway session");
                GatewaySession::spawn(
                    gateway_id,
                    self.store.clone(),
                    self.usage.clone(),
                    self.limits,
                )
            })
            .clone()
    }

    /// The shared object store.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session has been created yet.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Best-effort flush of every live session, used at shutdown.
    pub async fn flush_all(&self) {
        let sessions: Vec<Arc<GatewaySession>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        for session in sessions {
            if let Err(err) = session.flush().await {
                warn!(gateway = session.gateway_id(), %err, "shutdown flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_MAX_BUFFER_AGE_MS, DEFAULT_MAX_BUFFER_BYTES, MAX_DELTAS_PER_PUSH};
    use crate::storage::MemoryStore;

    fn registry() -> GatewayRegistry {
        GatewayRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(UsageSink::new(64)),
            BufferLimits {
                max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
                max_buffer_age_ms: DEFAULT_MAX_BUFFER_AGE_MS,
                max_log_size: MAX_DELTAS_PER_PUSH,
                high_watermark_bytes: DEFAULT_MAX_BUFFER_BYTES,
            },
        )
    }

    #[tokio::test]
    async fn test_sessions_created_on_first_reference() {
        let registry = registry();
        assert!(registry.is_empty());
        let a = registry.get_or_create("gw-a");
        let again = registry.get_or_create("gw-a");
        assert!(Arc::ptr_eq(&a, &again));
        registry.get_or_create("gw-b");
        assert_eq!(registry.len(), 2);
    }
}
