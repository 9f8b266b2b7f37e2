//! Configuration management for Dedup Vault
//!
//! Everything is read from the environment (optionally via `.env`) once at
//! startup, validated, and then shared read-only through `AppState`.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::dedup::classify::TypePolicy;

/// Default per-user quota: 10 MiB
pub const DEFAULT_QUOTA_BYTES: u64 = 10 * 1024 * 1024;

/// Default request body limit: 100 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Configuration errors, reported before the server starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub quota: QuotaConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Flat directory holding one file per fingerprint
    pub root: PathBuf,
    /// Where in-flight payloads are written before promotion
    pub staging: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Per-user budget, charged at logical (non-deduplicated) size
    pub per_user_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_request_bytes: usize,
    #[serde(default)]
    pub type_policy: TypePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let root = PathBuf::from("./uploads");
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                staging: root.join(".staging"),
                root,
            },
            database: DatabaseConfig {
                url: "sqlite:./dedup-vault.db".to_string(),
            },
            quota: QuotaConfig {
                per_user_bytes: DEFAULT_QUOTA_BYTES,
            },
            upload: UploadConfig {
                max_request_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                type_policy: TypePolicy::default(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = PathBuf::from(env::var("UPLOAD_PATH").unwrap_or_else(|_| "./uploads".to_string()));
        let staging = env::var("STAGING_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join(".staging"));

        let type_policy = match env::var("TYPE_EQUIVALENTS") {
            Ok(raw) => TypePolicy::parse(&raw).map_err(|reason| ConfigError::InvalidValue {
                key: "TYPE_EQUIVALENTS",
                value: raw.clone(),
                reason,
            })?,
            Err(_) => TypePolicy::default(),
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            storage: StorageConfig { root, staging },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:./dedup-vault.db".to_string()),
            },
            quota: QuotaConfig {
                per_user_bytes: parse_var("STORAGE_QUOTA_BYTES", DEFAULT_QUOTA_BYTES)?,
            },
            upload: UploadConfig {
                max_request_bytes: parse_var("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
                type_policy,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::Empty("UPLOAD_PATH"));
        }
        if self.storage.staging.as_os_str().is_empty() {
            return Err(ConfigError::Empty("STAGING_PATH"));
        }
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Empty("DATABASE_URL"));
        }
        if self.quota.per_user_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STORAGE_QUOTA_BYTES",
                value: "0".to_string(),
                reason: "quota must be positive".to_string(),
            });
        }
        if self.upload.max_request_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_UPLOAD_BYTES",
                value: "0".to_string(),
                reason: "limit must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration rooted in a scratch directory, used by tests
    pub fn for_root(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        let root = root.into();
        let mut config = Config::default();
        config.database.url = format!("sqlite:{}", root.join("vault.db").display());
        config.storage.staging = root.join("staging");
        config.storage.root = root.join("blobs");
        config.quota.per_user_bytes = quota_bytes;
        config
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
