//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `GRIDKEY_*` environment variable overrides.

use crate::index::{
    CompoundIndexStrategy, DimensionalityType, HashKeyIndexStrategy, IndexResult, IndexStrategy,
    RoundRobinKeyIndexStrategy, DEFAULT_MAX_DUPLICATES, DEFAULT_MAX_RANGES, DEFAULT_POOL_SIZE,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How writes are spread over key prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Plain SFC keys
    #[default]
    None,
    RoundRobin,
    Hash,
}

impl FromStr for PartitionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(PartitionStrategy::None),
            "round_robin" => Ok(PartitionStrategy::RoundRobin),
            "hash" => Ok(PartitionStrategy::Hash),
            _ => Err(format!("unknown partition strategy: {}", s)),
        }
    }
}

/// Index layout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_dimensionality")]
    pub dimensionality: DimensionalityType,

    #[serde(default)]
    pub partition_strategy: PartitionStrategy,

    #[serde(default = "default_num_partitions")]
    pub num_partitions: usize,

    #[serde(default = "default_bits_per_dimension")]
    pub bits_per_dimension: u8,

    #[serde(default = "default_max_duplicates")]
    pub max_duplicates: u64,
}

fn default_dimensionality() -> DimensionalityType {
    DimensionalityType::SpatialTemporalYear
}

fn default_num_partitions() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_bits_per_dimension() -> u8 {
    20
}

fn default_max_duplicates() -> u64 {
    DEFAULT_MAX_DUPLICATES
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensionality: default_dimensionality(),
            partition_strategy: PartitionStrategy::default(),
            num_partitions: default_num_partitions(),
            bits_per_dimension: default_bits_per_dimension(),
            max_duplicates: default_max_duplicates(),
        }
    }
}

impl IndexConfig {
    /// Build the configured strategy, partitioner first when one is set
    pub fn build_strategy(&self) -> IndexResult<IndexStrategy> {
        let sfc = self
            .dimensionality
            .create_strategy(self.bits_per_dimension, self.max_duplicates)?;
        let strategy = match self.partition_strategy {
            PartitionStrategy::None => IndexStrategy::from(sfc),
            PartitionStrategy::RoundRobin => CompoundIndexStrategy::new(
                RoundRobinKeyIndexStrategy::new(self.num_partitions)?,
                sfc,
            )
            .into(),
            PartitionStrategy::Hash => {
                CompoundIndexStrategy::new(HashKeyIndexStrategy::new(self.num_partitions)?, sfc)
                    .into()
            }
        };
        Ok(strategy)
    }
}

/// Query planning and scan execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_max_ranges")]
    pub max_ranges: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_max_ranges() -> usize {
    DEFAULT_MAX_RANGES
}

fn default_workers() -> usize {
    4
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_ranges: default_max_ranges(),
            workers: default_workers(),
        }
    }
}

/// Reference store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("gridkey").to_string_lossy().to_string())
        .unwrap_or_else(|| "./gridkey_data".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("gridkey").join("config.toml")),
            Some(PathBuf::from("/etc/gridkey/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `GRIDKEY_*` overrides; unparseable values are ignored
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Index overrides
        if let Some(dims) = lookup("GRIDKEY_DIMENSIONALITY") {
            match dims.parse() {
                Ok(d) => self.index.dimensionality = d,
                Err(e) => tracing::warn!("Ignoring GRIDKEY_DIMENSIONALITY: {}", e),
            }
        }
        if let Some(partition) = lookup("GRIDKEY_PARTITION_STRATEGY") {
            match partition.parse() {
                Ok(p) => self.index.partition_strategy = p,
                Err(e) => tracing::warn!("Ignoring GRIDKEY_PARTITION_STRATEGY: {}", e),
            }
        }
        if let Some(Ok(n)) = lookup("GRIDKEY_NUM_PARTITIONS").map(|v| v.parse()) {
            self.index.num_partitions = n;
        }
        if let Some(Ok(bits)) = lookup("GRIDKEY_BITS_PER_DIMENSION").map(|v| v.parse()) {
            self.index.bits_per_dimension = bits;
        }

        // Scan overrides
        if let Some(Ok(max)) = lookup("GRIDKEY_MAX_RANGES").map(|v| v.parse()) {
            self.scan.max_ranges = max;
        }
        if let Some(Ok(workers)) = lookup("GRIDKEY_WORKERS").map(|v| v.parse()) {
            self.scan.workers = workers;
        }

        // Store overrides
        if let Some(data_dir) = lookup("GRIDKEY_DATA_DIR") {
            self.store.data_dir = data_dir;
        }

        // Logging overrides
        if let Some(level) = lookup("GRIDKEY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("GRIDKEY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# gridkey Configuration
#
# Environment variables override these settings:
# - GRIDKEY_DIMENSIONALITY
# - GRIDKEY_PARTITION_STRATEGY
# - GRIDKEY_NUM_PARTITIONS
# - GRIDKEY_BITS_PER_DIMENSION
# - GRIDKEY_MAX_RANGES
# - GRIDKEY_WORKERS
# - GRIDKEY_DATA_DIR
# - GRIDKEY_LOG_LEVEL
# - GRIDKEY_LOG_FORMAT

[index]
# spatial, spatial_temporal_year, spatial_temporal_month, spatial_temporal_day
dimensionality = "spatial_temporal_year"

# Key prefix partitioning: none, round_robin, hash
partition_strategy = "none"

# Size of the partition prefix pool
num_partitions = 3

# Resolution of the finest space-filling-curve tier
bits_per_dimension = 20

# Most cells an extent may be duplicated into before moving to a coarser tier
max_duplicates = 16

[scan]
# Upper bound on key ranges produced by one query
max_ranges = 1024

# Number of splits a query is divided into
workers = 4

[store]
# Directory for the reference SQLite store
data_dir = "~/.local/share/gridkey"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty, json
format = "pretty"

# Optional log file path
# file = "/var/log/gridkey/gridkey.log"
"#
    .to_string()
}
