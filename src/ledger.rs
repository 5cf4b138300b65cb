use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One completed proxied call. Immutable once written; the per-user log is
/// append-only NDJSON with no updates or deletes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp_utc: String,
    pub api_key_id: u64,
    pub wp_user_id: u64,
    pub endpoint: String,
    pub method: String,
    pub tokens_used: u64,
    pub ip_address: Option<String>,
    pub request_data: Value,
    pub response_data: Value,
    pub response_status: u16,
}

/// Aggregate over a user's records, derived on demand from the full log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_tokens: u64,
    pub request_count: u64,
    pub last_request: Option<String>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only per-user usage log. Admission decisions always derive from
/// this history, never from a cached aggregate.
pub struct UsageLedger {
    dir: PathBuf,
    append_lock: Mutex<()>,
}

impl UsageLedger {
    /// Creates the log directory if needed. On Unix the directory is made
    /// owner-only: the records live outside any web-servable root.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self {
            dir,
            append_lock: Mutex::new(()),
        })
    }

    fn log_path(&self, user_id: u64) -> PathBuf {
        self.dir.join(format!("{user_id}.jsonl"))
    }

    /// Exclusive append: one full line per record, never interleaved, safe
    /// under concurrent in-flight requests for the same user.
    pub async fn append(&self, record: &UsageRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(record.wp_user_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Folds the complete per-user log into totals. A missing log is a new
    /// user, not an error. A corrupt line is skipped with a warning; the
    /// rest of the file still folds.
    pub async fn summarize(&self, user_id: u64) -> Result<UsageSummary, LedgerError> {
        let raw = match tokio::fs::read_to_string(self.log_path(user_id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(UsageSummary::default()),
            Err(err) => return Err(err.into()),
        };

        let mut summary = UsageSummary::default();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: UsageRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(user_id, %err, "skipping unparseable ledger line");
                    continue;
                }
            };
            summary.total_tokens = summary.total_tokens.saturating_add(record.tokens_used);
            summary.request_count += 1;
            summary.last_request = Some(record.timestamp_utc);
        }
        Ok(summary)
    }
}
