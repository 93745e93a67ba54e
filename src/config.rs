//! Process-wide configuration, loaded once at startup.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_storage_listen_addr() -> SocketAddr {
    "0.0.0.0:8081".parse().unwrap()
}

fn default_meta_dsn() -> String {
    "memory://".to_string()
}

fn default_desired_parts() -> usize {
    6
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_gc_ttl_hours() -> u64 {
    24
}

fn default_gc_interval_min() -> u64 {
    30
}

/// Front-end (`front` binary) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_meta_dsn")]
    pub meta_dsn: String,

    #[serde(default)]
    pub storages: Vec<String>,

    /// Desired part count `P`; the actual `total_parts` is re-derived from
    /// the ceil-based chunk size (see `model::plan_chunks`).
    #[serde(default = "default_desired_parts")]
    pub desired_parts: usize,

    /// Upper bound on a storage node's reported `total_bytes` for it to be
    /// considered a placement candidate. `<= 0` means unlimited.
    #[serde(default)]
    pub max_storage_load_bytes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            meta_dsn: default_meta_dsn(),
            storages: Vec::new(),
            desired_parts: default_desired_parts(),
            max_storage_load_bytes: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.listen_addr = parsed;
            }
        }
        if let Ok(dsn) = std::env::var("META_DSN") {
            self.meta_dsn = dsn;
        }
        if let Ok(storages) = std::env::var("STORAGES") {
            self.storages = storages
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Load from `CONFIG_PATH` (default `./config.yaml`) if present, then
    /// apply env overrides on top.
    pub fn load() -> Self {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "./config.yaml".to_string());
        let mut config = if std::path::Path::new(&path).exists() {
            Self::from_file(&path).unwrap_or_default()
        } else {
            Self::default()
        };
        config.apply_env();
        config
    }
}

/// Storage-node (`storage` binary) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_gc_ttl_hours")]
    pub gc_ttl_hours: u64,

    #[serde(default = "default_gc_interval_min")]
    pub gc_interval_min: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_storage_listen_addr(),
            data_dir: default_data_dir(),
            gc_ttl_hours: default_gc_ttl_hours(),
            gc_interval_min: default_gc_interval_min(),
        }
    }
}

impl StorageConfig {
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(ttl) = std::env::var("GC_TTL_HOURS") {
            if let Ok(parsed) = ttl.parse() {
                config.gc_ttl_hours = parsed;
            }
        }
        if let Ok(interval) = std::env::var("GC_INTERVAL_MIN") {
            if let Ok(parsed) = interval.parse() {
                config.gc_interval_min = parsed;
            }
        }
        config
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}
