//! tokengate: a quota-enforcing proxy in front of an OpenAI-style API.
//!
//! Per request: authenticate the caller, estimate the token cost up front,
//! admit or reject against the durable usage ledger, rate-limit per user,
//! forward the request verbatim, then record what was actually consumed so
//! the next pre-flight check is accurate.

pub mod admission;
pub mod config;
pub mod costing;
mod error;
pub mod http;
pub mod keys;
pub mod ledger;
pub mod limits;
pub mod observability;
pub mod proxy_backend;
pub mod recorder;
pub mod token_count;
pub mod validate;

pub use admission::{Admission, AdmissionGate};
pub use config::{GatewayConfig, GatewayConfigError};
pub use costing::{CostEstimate, ImageBreakdown, ImageOperation};
pub use error::{FieldErrors, GatewayError};
pub use http::GatewayHttpState;
pub use keys::{
    ApiKeyAllocation, FileKeyStore, KeyResolver, KeyStateFile, KeyStoreError, SpendOutcome,
};
pub use ledger::{LedgerError, UsageLedger, UsageRecord, UsageSummary};
pub use limits::{RateLimitConfig, RateLimiter};
pub use observability::{Observability, ObservabilitySnapshot};
pub use proxy_backend::UpstreamClient;
pub use recorder::UsageRecorder;
pub use token_count::TextEncoder;

pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        now.as_secs()
    }
}

/// Client-facing timestamps share one shape: `Y-m-d H:i:s`, UTC.
pub fn utc_timestamp() -> String {
    use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

    const TIMESTAMP_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_timestamp_has_expected_shape() {
        let stamp = utc_timestamp();
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], " ");
        assert_eq!(&stamp[13..14], ":");
    }
}
