//! Configuration for the stock ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Transfer configuration
    pub transfer: TransferConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/stock-ledger"),
            service_name: "stock-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Sync the WAL on every transfer commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum line items in one transfer
    pub max_line_items: usize,

    /// How long a transaction waits for the write lock before failing with a conflict
    pub lock_timeout_ms: u64,

    /// Actor mailbox capacity (backpressure)
    pub mailbox_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_line_items: 100,
            lock_timeout_ms: 2_000,
            mailbox_capacity: 1_000,
        }
    }
}

impl TransferConfig {
    /// Lock timeout as a `Duration`
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("STOCK_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("STOCK_LEDGER_LOCK_TIMEOUT_MS") {
            config.transfer.lock_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid STOCK_LEDGER_LOCK_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(max) = std::env::var("STOCK_LEDGER_MAX_LINE_ITEMS") {
            config.transfer.max_line_items = max.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid STOCK_LEDGER_MAX_LINE_ITEMS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.transfer.max_line_items == 0 {
            return Err(crate::Error::Config(
                "transfer.max_line_items must be positive".to_string(),
            ));
        }
        if self.transfer.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "transfer.mailbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
