//! Environment configuration for the blobyard server

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use blobyard_stash::StashConfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Minimum resource size {minimum} exceeds maximum resource size {maximum}")]
    SizeWindow { minimum: u64, maximum: u64 },
}

/// Backing store for every blob namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Files under `BLOBYARD_STORE_ROOT`
    Local,
    /// Process memory; contents are lost on restart
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StoreKind::Local),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store kind '{other}', expected 'local' or 'memory'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub store_root: PathBuf,
    /// Smallest uploaded file merged into a bundle, in bytes
    pub minimum_size: u64,
    /// Largest uploaded file merged into a bundle, in bytes
    pub maximum_size: u64,
    /// Request body limit for uploads
    pub max_body_bytes: usize,
    pub stash: StashConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            store: StoreKind::Local,
            store_root: PathBuf::from("./blobyard-data"),
            minimum_size: 64 * 1024,
            maximum_size: 512 * 1024 * 1024,
            max_body_bytes: 1024 * 1024 * 1024,
            stash: StashConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `BLOBYARD_*` variables, falling back to defaults for unset ones
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let stash_defaults = StashConfig::default();

        let config = Self {
            host: lookup("BLOBYARD_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "BLOBYARD_PORT", defaults.port)?,
            store: parse_var(&lookup, "BLOBYARD_STORE", defaults.store)?,
            store_root: lookup("BLOBYARD_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_root),
            minimum_size: parse_var(&lookup, "BLOBYARD_MIN_SIZE", defaults.minimum_size)?,
            maximum_size: parse_var(&lookup, "BLOBYARD_MAX_SIZE", defaults.maximum_size)?,
            max_body_bytes: parse_var(&lookup, "BLOBYARD_MAX_BODY_BYTES", defaults.max_body_bytes)?,
            stash: StashConfig {
                fetch_attempts: parse_var(
                    &lookup,
                    "BLOBYARD_FETCH_ATTEMPTS",
                    stash_defaults.fetch_attempts,
                )?,
                retry_backoff_ms: parse_var(
                    &lookup,
                    "BLOBYARD_RETRY_BACKOFF_MS",
                    stash_defaults.retry_backoff_ms,
                )?,
                match_concurrency: parse_var(
                    &lookup,
                    "BLOBYARD_MATCH_CONCURRENCY",
                    stash_defaults.match_concurrency,
                )?,
                temp_dir: lookup("BLOBYARD_TEMP_DIR").map(PathBuf::from),
            },
        };

        if config.minimum_size > config.maximum_size {
            return Err(ConfigError::SizeWindow {
                minimum: config.minimum_size,
                maximum: config.maximum_size,
            });
        }
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let value = format!("{}:{}", self.host, self.port);
        value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "BLOBYARD_HOST",
            value,
            reason: e.to_string(),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
