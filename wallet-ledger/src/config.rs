//! Configuration for the wallet ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Storage backend
    pub storage: StorageBackend,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Engine retry policy
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wallet-ledger"),
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageBackend::Rocksdb,
            rocksdb: RocksDBConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Which store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on restart
    Memory,
    /// RocksDB under `data_dir`
    Rocksdb,
}

impl std::str::FromStr for StorageBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" => Ok(StorageBackend::Rocksdb),
            other => Err(crate::Error::Config(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// Optimistic retry policy for mutating operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per operation before surfacing a conflict
    pub max_attempts: u32,

    /// Base backoff between attempts (milliseconds)
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 2,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("WALLET_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("WALLET_STORAGE_BACKEND") {
            config.storage = backend.parse()?;
        }

        if let Ok(attempts) = std::env::var("WALLET_MAX_ATTEMPTS") {
            config.engine.max_attempts = attempts.parse().map_err(|_| {
                crate::Error::Config(format!("WALLET_MAX_ATTEMPTS is not a number: {}", attempts))
            })?;
        }

        Ok(config)
    }
}
