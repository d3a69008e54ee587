//! Application state
//!
//! Central state shared by every request handler: the gateway registry,
//! verification keys, the optional shard router and the usage sink. It
//! follows the factory pattern: `AppState::from_config` wires the
//! configured store backend and shard layout, `spawn_background` starts
//! the long-lived tasks.

use crate::auth::JwtKeys;
use crate::core::config::{Config, StoreBackend};
use crate::gateway::GatewayRegistry;
use crate::shard::{parse_shard_config, ShardRouter};
use crate::storage::{FsStore, MemoryStore, ObjectStore};
use crate::system::usage::{spawn_drain_task, UsageSink};
use crate::types::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared state behind every handler.
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Gateway sessions, created on first reference
    pub registry: GatewayRegistry,
    /// Token verification and signing material
    pub keys: JwtKeys,
    /// Fan-out router; `None` runs single-gateway mode
    pub router: Option<ShardRouter>,
    /// Usage metering sink
    pub usage: Arc<UsageSink>,
}

impl AppState {
    /// Build the state graph from validated configuration.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let keys = JwtKeys::parse(&config.auth.jwt_secret)?;

        let store: Arc<dyn ObjectStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Filesystem => Arc::new(FsStore::new(config.store.data_dir.clone())),
        };

        let usage = Arc::new(UsageSink::new(config.usage.max_buckets));
        let registry = GatewayRegistry::new(store, usage.clone(), config.buffer_limits());

        let router = match &config.shard.config {
            Some(raw) => match parse_shard_config(raw) {
                Some(shard_config) => {
                    info!(
                        gateways = shard_config.all_gateway_ids().len(),
                        "shard routing enabled"
                    );
                    Some(ShardRouter::new(
                        shard_config,
                        config.self_endpoint(),
                        config.shard.endpoints.clone(),
                        Duration::from_secs(config.server.request_timeout_secs),
                    ))
                }
                None => {
                    warn!("SHARD_CONFIG present but malformed, running single-gateway mode");
                    None
                }
            },
            None => None,
        };

        Ok(Arc::new(Self { config, registry, keys, router, usage }))
    }

    /// Start background tasks: the usage drain loop.
    pub fn spawn_background(self: &Arc<Self>) {
        spawn_drain_task(
            self.usage.clone(),
            self.config.usage.endpoint.clone(),
            Duration::from_secs(self.config.usage.drain_interval_secs),
        );
    }
}
