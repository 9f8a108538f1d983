//! Configuration for the OpenEndpoint server.
//!
//! Configuration is a JSON document (`serve --config <file>`) merged with
//! environment-variable overrides. Every field has a default so the server
//! can boot with no file at all.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EndpointError, EndpointResult};
use crate::types::RegionId;

/// Default request-handling deadline in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default lifecycle scan interval in seconds (1 hour).
const DEFAULT_LIFECYCLE_INTERVAL_SECS: u64 = 3600;

/// Default replication worker wake-up interval in seconds.
const DEFAULT_REPLICATION_TICK_SECS: u64 = 5;

/// Default maximum packed-volume size in bytes (1 GiB).
const DEFAULT_MAX_VOLUME_SIZE: u64 = 1 << 30;

/// Default number of appended bytes between fsync batches (8 MiB).
const DEFAULT_FSYNC_BATCH_BYTES: u64 = 8 << 20;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Network listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9000,
        }
    }
}

/// Packed-volume storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Directory holding `NNNN.dat` volumes and `NNNN.idx` sidecar indexes.
    pub data_dir: String,
    /// A volume becomes read-only once its size reaches this many bytes.
    pub max_volume_size: u64,
    /// Fsync the head volume after this many appended bytes.
    pub fsync_batch_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_owned(),
            max_volume_size: DEFAULT_MAX_VOLUME_SIZE,
            fsync_batch_bytes: DEFAULT_FSYNC_BATCH_BYTES,
        }
    }
}

/// Static credentials for the authenticator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// The root access key ID.
    pub access_key: String,
    /// The root secret access key.
    pub secret_key: String,
}

/// A replication destination region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationPeer {
    /// The target region ID.
    pub region: RegionId,
    /// Whether delivery to this region is currently active.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// OpenEpConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for OpenEndpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenEpConfig {
    /// Network listener settings.
    pub server: ServerConfig,
    /// Packed-volume storage settings.
    pub storage: StorageConfig,
    /// Static credentials.
    pub auth: AuthConfig,
    /// This deployment's region ID (the local vector-clock axis).
    pub region: RegionId,
    /// Configured replication destinations.
    pub replication_peers: Vec<ReplicationPeer>,
    /// Log level filter (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Outer request deadline in seconds.
    pub request_timeout_secs: u64,
    /// Lifecycle processor scan interval in seconds.
    pub lifecycle_interval_secs: u64,
    /// Replication worker wake-up interval in seconds.
    pub replication_tick_secs: u64,
}

impl Default for OpenEpConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            region: RegionId::default(),
            replication_peers: Vec::new(),
            log_level: "info".to_owned(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            lifecycle_interval_secs: DEFAULT_LIFECYCLE_INTERVAL_SECS,
            replication_tick_secs: DEFAULT_REPLICATION_TICK_SECS,
        }
    }
}

impl OpenEpConfig {
    /// Load configuration from an optional JSON file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidArgument`] if the file cannot be read
    /// or parsed, or if an override value is malformed.
    pub fn load(path: Option<&str>) -> EndpointResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        debug!(region = %config.region, data_dir = %config.storage.data_dir, "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidArgument`] on read or parse failure.
    pub fn from_file(path: &str) -> EndpointResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EndpointError::invalid_argument(format!("cannot read config file {path}: {e}"))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EndpointError::invalid_argument(format!("cannot parse config file {path}: {e}"))
        })
    }

    /// Apply `OPENEP_*` environment-variable overrides in place.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidArgument`] if `OPENEP_SERVER_PORT` is
    /// not a valid port number.
    pub fn apply_env(&mut self) -> EndpointResult<()> {
        if let Ok(v) = std::env::var("OPENEP_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("OPENEP_SERVER_PORT") {
            self.server.port = v.parse().map_err(|_| {
                EndpointError::invalid_argument(format!("invalid OPENEP_SERVER_PORT: {v}"))
            })?;
        }
        if let Ok(v) = std::env::var("OPENEP_STORAGE_DATA_DIR") {
            self.storage.data_dir = v;
        }
        if let Ok(v) = std::env::var("OPENEP_AUTH_ACCESS_KEY") {
            self.auth.access_key = v;
        }
        if let Ok(v) = std::env::var("OPENEP_AUTH_SECRET_KEY") {
            self.auth.secret_key = v;
        }
        if let Ok(v) = std::env::var("OPENEP_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }
}
