use std::collections::BTreeMap;

use thiserror::Error;

use crate::ledger::LedgerError;

/// Field-level validation failures, keyed by the offending request field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Everything the pipeline can reject or fail a request with. The `Display`
/// string is the client-facing `error` field; status mapping lives in
/// [`GatewayError::status_code`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{message}")]
    Authentication { message: String },
    #[error("Validation failed")]
    Validation { details: FieldErrors },
    #[error("Insufficient tokens")]
    QuotaExceeded {
        remaining: u64,
        estimated_required: u64,
    },
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("{message}")]
    UpstreamTransport {
        status: Option<u16>,
        message: String,
    },
    #[error("Upstream request timed out")]
    UpstreamTimeout,
    #[error("Invalid response from upstream")]
    UpstreamResponse,
    #[error("Usage ledger unavailable")]
    Ledger(#[from] LedgerError),
}

impl GatewayError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// HTTP status for the error. A transport failure that carried a readable
    /// upstream status passes that status through; everything else maps to
    /// the fixed taxonomy.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Authentication { .. } => 401,
            Self::Validation { .. } => 422,
            Self::QuotaExceeded { .. } => 403,
            Self::RateLimited => 429,
            Self::UpstreamTransport { status, .. } => status.filter(|code| *code >= 400).unwrap_or(500),
            Self::UpstreamTimeout | Self::UpstreamResponse | Self::Ledger(_) => 500,
        }
    }
}
