//! API Configuration Module
//!
//! Server, authentication and storage settings for the HTTP binary. The
//! governor's own limits live in `damper_core::GovernorConfig`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use damper_core::{ConfigError, DamperResult};

use crate::constants::{
    DEFAULT_BIND_HOST, DEFAULT_LMDB_MAX_SIZE_MB, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS,
};

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind.
    pub bind_host: String,

    /// Port to listen on.
    pub port: u16,

    /// Accepted API keys. Empty means every request is allowed (dev mode).
    pub api_keys: Vec<String>,

    /// Directory for the durable counter and recency store. `None` keeps
    /// coordination state in memory, which is only correct for a single
    /// instance.
    pub lmdb_path: Option<PathBuf>,

    /// LMDB map size in megabytes.
    pub lmdb_max_size_mb: usize,

    /// Requests running longer than this are aborted with 408.
    pub request_timeout: Duration,

    /// Maximum requests served at once. `None` means unbounded.
    pub concurrency_limit: Option<usize>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            api_keys: Vec::new(),
            lmdb_path: None,
            lmdb_max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            concurrency_limit: None,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DAMPER_API_BIND`: Host to bind (default: 0.0.0.0)
    /// - `PORT` or `DAMPER_API_PORT`: Port (default: 3000)
    /// - `DAMPER_API_KEYS`: Comma-separated API keys (empty = allow all)
    /// - `DAMPER_LMDB_PATH`: LMDB directory (unset = in-memory stores)
    /// - `DAMPER_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `DAMPER_API_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 30)
    /// - `DAMPER_API_CONCURRENCY_LIMIT`: Max in-flight requests (unset = unbounded)
    pub fn from_env() -> DamperResult<Self> {
        let defaults = Self::default();

        let bind_host =
            std::env::var("DAMPER_API_BIND").unwrap_or_else(|_| defaults.bind_host.clone());

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("DAMPER_API_PORT").ok())
        {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: "DAMPER_API_PORT".to_string(),
                value: raw.clone(),
                reason: "must be a port number".to_string(),
            })?,
            None => defaults.port,
        };

        let api_keys = std::env::var("DAMPER_API_KEYS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let lmdb_path = std::env::var("DAMPER_LMDB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let lmdb_max_size_mb = std::env::var("DAMPER_LMDB_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.lmdb_max_size_mb);

        let request_timeout = std::env::var("DAMPER_API_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let concurrency_limit = std::env::var("DAMPER_API_CONCURRENCY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok());

        let config = Self {
            bind_host,
            port,
            api_keys,
            lmdb_path,
            lmdb_max_size_mb,
            request_timeout,
            concurrency_limit,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_keys(mut self, keys: Vec<String>) -> Self {
        self.api_keys = keys;
        self
    }

    pub fn with_lmdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lmdb_path = Some(path.into());
        self
    }

    /// Whether requests are accepted without an API key.
    pub fn is_dev_mode(&self) -> bool {
        self.api_keys.is_empty()
    }

    /// Resolve the socket address to bind.
    pub fn bind_addr(&self) -> DamperResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue {
                field: "DAMPER_API_BIND".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn validate(&self) -> DamperResult<()> {
        if self.lmdb_path.is_some() && self.lmdb_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DAMPER_LMDB_MAX_SIZE_MB".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "DAMPER_API_REQUEST_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.concurrency_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "DAMPER_API_CONCURRENCY_LIMIT".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        self.bind_addr().map(|_| ())
    }
}
