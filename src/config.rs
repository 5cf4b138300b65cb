use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::RateLimitConfig;

/// Gateway configuration, read from a JSON file at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    pub upstream_api_key: String,
    #[serde(default = "default_upstream_timeout_seconds")]
    pub upstream_timeout_seconds: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    pub keys_file: PathBuf,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_upstream_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_upstream_timeout_seconds() -> u64 {
    300
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("storage/api_logs")
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("listen", &self.listen)
            .field("upstream_base_url", &self.upstream_base_url)
            .field("upstream_api_key", &"<redacted>")
            .field("upstream_timeout_seconds", &self.upstream_timeout_seconds)
            .field("rate_limit", &self.rate_limit)
            .field("ledger_dir", &self.ledger_dir)
            .field("keys_file", &self.keys_file)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error("read config failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse config failed: {0}")]
    Parse(#[from] serde_json::Error),
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
