use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// One issued credential and its token budget for the current allocation
/// period. Provisioned by an external process; the gateway reads it and
/// increments `tokens_used`, nothing else.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiKeyAllocation {
    pub id: u64,
    pub api_key: String,
    pub wp_user_id: u64,
    pub total_tokens_allocated: u64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for ApiKeyAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAllocation")
            .field("id", &self.id)
            .field("api_key", &"<redacted>")
            .field("wp_user_id", &self.wp_user_id)
            .field("total_tokens_allocated", &self.total_tokens_allocated)
            .field("tokens_used", &self.tokens_used)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// The provisioning process's key file: a JSON document the gateway loads at
/// startup and rewrites whenever `tokens_used` moves.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyStateFile {
    #[serde(default)]
    pub keys: Vec<ApiKeyAllocation>,
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("read key state failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse key state failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("write key state failed: {0}")]
    Write(std::io::Error),
    #[error("unknown api key")]
    UnknownKey,
}

impl KeyStateFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    return Err(KeyStoreError::Write(err));
                }
            }
        }

        let payload = serde_json::to_vec_pretty(self).map_err(KeyStoreError::Parse)?;
        let tmp_path = path.with_extension("tmp");

        if std::fs::write(&tmp_path, &payload).is_err() {
            std::fs::write(path, &payload).map_err(KeyStoreError::Write)?;
            return Ok(());
        }

        match std::fs::rename(&tmp_path, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                std::fs::write(path, &payload).map_err(KeyStoreError::Write)?;
                let _ = std::fs::remove_file(&tmp_path);
                Ok(())
            }
        }
    }
}

/// Result of charging actual usage against a key.
#[derive(Clone, Copy, Debug)]
pub struct SpendOutcome {
    pub tokens_used: u64,
    pub total_tokens_allocated: u64,
}

impl SpendOutcome {
    /// True when the recorded total crossed the allocation. The call was
    /// already forwarded at that point; the overrun is recorded, not
    /// rejected retroactively.
    pub fn overran(&self) -> bool {
        self.tokens_used > self.total_tokens_allocated
    }
}

/// Credential lookup and mutation seam. The real store is provisioned
/// outside the gateway; tests plug in their own resolver.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Option<ApiKeyAllocation>;

    async fn record_spent(&self, api_key: &str, tokens: u64)
    -> Result<SpendOutcome, KeyStoreError>;
}

/// Key store backed by the provisioning process's JSON state file. Without a
/// path it is purely in-memory (tests, ephemeral deployments).
pub struct FileKeyStore {
    path: Option<PathBuf>,
    state: Mutex<KeyStateFile>,
}

impl FileKeyStore {
    pub fn new(state: KeyStateFile) -> Self {
        Self {
            path: None,
            state: Mutex::new(state),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let path = path.into();
        let state = KeyStateFile::load(&path)?;
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }
}

#[async_trait]
impl KeyResolver for FileKeyStore {
    async fn resolve(&self, api_key: &str) -> Option<ApiKeyAllocation> {
        let state = self.state.lock().await;
        state.keys.iter().find(|key| key.api_key == api_key).cloned()
    }

    async fn record_spent(
        &self,
        api_key: &str,
        tokens: u64,
    ) -> Result<SpendOutcome, KeyStoreError> {
        let mut state = self.state.lock().await;
        let key = state
            .keys
            .iter_mut()
            .find(|key| key.api_key == api_key)
            .ok_or(KeyStoreError::UnknownKey)?;
        key.tokens_used = key.tokens_used.saturating_add(tokens);
        let outcome = SpendOutcome {
            tokens_used: key.tokens_used,
            total_tokens_allocated: key.total_tokens_allocated,
        };

        if let Some(path) = self.path.as_ref() {
            state.save(path)?;
        }
        Ok(outcome)
    }
}
