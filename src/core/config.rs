//! Configuration management for the delta-sync gateway
//!
//! Settings load from an optional TOML file, then environment
//! overrides, then validation. The deployment bindings (`JWT_SECRET`,
//! `SHARD_CONFIG`, `ALLOWED_ORIGINS`, `MAX_BUFFER_BYTES`) are honoured
//! verbatim; everything else uses the `LG_` prefix.

use crate::buffer::BufferLimits;
use crate::constants::{DEFAULT_MAX_BUFFER_AGE_MS, DEFAULT_MAX_BUFFER_BYTES, MAX_DELTAS_PER_PUSH};
use crate::types::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Buffer and flush tuning
    pub buffer: BufferConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Object-store configuration
    pub store: StoreConfig,

    /// Shard layout and fan-out endpoints
    pub shard: ShardSettings,

    /// Usage metering
    pub usage: UsageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: SocketAddr,

    /// Outbound request timeout in seconds (shard fan-out)
    pub request_timeout_secs: u64,

    /// Origins allowed by CORS; empty list disables CORS headers
    pub allowed_origins: Vec<String>,
}

/// Buffer and flush tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Flush threshold in bytes
    pub max_buffer_bytes: usize,

    /// Flush threshold on the age of the oldest entry (milliseconds)
    pub max_buffer_age_ms: u64,

    /// Backpressure watermark in bytes; defaults to `max_buffer_bytes`
    pub high_watermark_bytes: Option<usize>,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret: bare string, `primary,previous` pair, or JSON list
    pub jwt_secret: String,
}

/// Supported object-store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Keep objects in process memory
    Memory,
    /// Keep objects under a local directory
    Filesystem,
}

/// Object-store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which adapter to use
    pub backend: StoreBackend,

    /// Root directory for the filesystem backend
    pub data_dir: PathBuf,
}

/// Shard layout and fan-out endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardSettings {
    /// Shard config document (JSON, per the `SHARD_CONFIG` binding);
    /// absent means single-gateway mode
    pub config: Option<String>,

    /// Per-gateway endpoint overrides for fan-out
    pub endpoints: HashMap<String, String>,

    /// Base URL the router uses for gateways without an override;
    /// defaults to the local bind address
    pub self_endpoint: Option<String>,
}

/// Usage metering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Control-plane endpoint drained to; absent logs and drops
    pub endpoint: Option<String>,

    /// Seconds between drains
    pub drain_interval_secs: u64,

    /// Bound on live aggregates
    pub max_buckets: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".parse().expect("static address"),
            request_timeout_secs: 30,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            max_buffer_age_ms: DEFAULT_MAX_BUFFER_AGE_MS,
            high_watermark_bytes: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: String::new() }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self { config: None, endpoints: HashMap::new(), self_endpoint: None }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self { endpoint: None, drain_interval_secs: 60, max_buckets: 4_096 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl Config {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::validation(format!("Failed to read config file: {e}")))?;
        toml::from_str(&contents)
            .map_err(|e| Error::validation(format!("Failed to parse config file: {e}")))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(secret) = env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(shard_config) = env::var("SHARD_CONFIG") {
            if !shard_config.trim().is_empty() {
                self.shard.config = Some(shard_config);
            }
        }

        if let Ok(origins) = env::var("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(max) = env::var("MAX_BUFFER_BYTES") {
            self.buffer.max_buffer_bytes = max
                .parse()
                .map_err(|e| Error::validation(format!("Invalid MAX_BUFFER_BYTES: {e}")))?;
        }

        if let Ok(addr) = env::var("LG_HTTP_ADDR") {
            self.server.http_addr = addr
                .parse()
                .map_err(|e| Error::validation(format!("Invalid HTTP address: {e}")))?;
        }

        if let Ok(backend) = env::var("LG_STORE_BACKEND") {
            self.store.backend = match backend.as_str() {
                "memory" => StoreBackend::Memory,
                "filesystem" => StoreBackend::Filesystem,
                other => {
                    return Err(Error::validation(format!("Invalid store backend: {other}")))
                }
            };
        }

        if let Ok(data_dir) = env::var("LG_DATA_DIR") {
            self.store.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(level) = env::var("LG_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(endpoint) = env::var("LG_USAGE_ENDPOINT") {
            self.usage.endpoint = Some(endpoint);
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(Error::validation(
                "JWT secret missing: set JWT_SECRET or auth.jwt_secret",
            ));
        }

        if self.buffer.max_buffer_bytes < 1024 {
            return Err(Error::validation("max_buffer_bytes too small (minimum 1KB)"));
        }

        if let Some(watermark) = self.buffer.high_watermark_bytes {
            if watermark < 1024 {
                return Err(Error::validation("high watermark too small (minimum 1KB)"));
            }
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(Error::validation(format!("Invalid log level: {other}"))),
        }

        Ok(())
    }

    /// Buffer limits handed to gateway sessions.
    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            max_buffer_bytes: self.buffer.max_buffer_bytes,
            max_buffer_age_ms: self.buffer.max_buffer_age_ms,
            max_log_size: MAX_DELTAS_PER_PUSH,
            high_watermark_bytes: self
                .buffer
                .high_watermark_bytes
                .unwrap_or(self.buffer.max_buffer_bytes),
        }
    }

    /// Base URL the shard router targets when a gateway has no override.
    pub fn self_endpoint(&self) -> String {
        match &self.shard.self_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("http://127.0.0.1:{}", self.server.http_addr.port()),
        }
    }
}
