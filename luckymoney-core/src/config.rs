//! Configuration for the lucky money core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest scale `rust_decimal` can represent
const MAX_PRECISION: u32 = 28;

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Envelope policy
    pub envelope: EnvelopeConfig,

    /// Expiry sweeper configuration
    pub sweeper: SweeperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/luckymoney"),
            service_name: "luckymoney-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            envelope: EnvelopeConfig::default(),
            sweeper: SweeperConfig::default(),
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

    /// fsync every committed writer transaction
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// Envelope policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Decimal places of the smallest share unit; also the canonical
    /// precision amounts are normalized to on read
    pub precision: u32,

    /// Maximum number of shares per envelope
    pub max_shares: u32,

    /// Maximum message length (characters)
    pub max_message_len: usize,

    /// Age after which an envelope is expired by the sweeper (seconds)
    pub expire_after_secs: u64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            precision: 2,
            max_shares: 1_000,
            max_message_len: 128,
            expire_after_secs: 24 * 60 * 60,
        }
    }
}

/// Expiry sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Run the sweeper task
    pub enabled: bool,

    /// Interval between sweeps (seconds)
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
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

        if let Ok(data_dir) = std::env::var("LUCKYMONEY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Some(precision) = env_parse("LUCKYMONEY_PRECISION")? {
            config.envelope.precision = precision;
        }

        if let Some(secs) = env_parse("LUCKYMONEY_EXPIRE_AFTER_SECS")? {
            config.envelope.expire_after_secs = secs;
        }

        if let Some(secs) = env_parse("LUCKYMONEY_SWEEP_INTERVAL_SECS")? {
            config.sweeper.interval_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::Result<()> {
        self.envelope.validate()?;
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(crate::Error::Config(
                "sweeper interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl EnvelopeConfig {
    /// Check envelope policy bounds
    pub fn validate(&self) -> crate::Result<()> {
        check_precision(self.precision)?;
        if self.max_shares == 0 {
            return Err(crate::Error::Config("max_shares must be positive".to_string()));
        }
        Ok(())
    }
}

/// Decimal places must fit `rust_decimal`'s scale
pub(crate) fn check_precision(precision: u32) -> crate::Result<()> {
    if precision > MAX_PRECISION {
        return Err(crate::Error::Config(format!(
            "precision {} exceeds {}",
            precision, MAX_PRECISION
        )));
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> crate::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "luckymoney-core");
        assert_eq!(config.envelope.precision, 2);
        assert!(config.sweeper.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/luckymoney"

            [envelope]
            precision = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/luckymoney"));
        assert_eq!(config.envelope.precision, 4);
        assert_eq!(config.envelope.max_shares, 1_000);
        assert!(config.rocksdb.sync_writes);
    }

    #[test]
    fn test_validate_rejects_bad_precision() {
        let mut config = Config::default();
        config.envelope.precision = 29;
        assert!(config.validate().is_err());
    }
}
