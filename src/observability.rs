use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub admitted: u64,
    pub auth_failures: u64,
    pub validation_failures: u64,
    pub quota_exceeded: u64,
    pub rate_limited: u64,
    pub upstream_failures: u64,
    pub records_appended: u64,
}

#[derive(Debug, Default)]
pub struct Observability {
    snapshot: ObservabilitySnapshot,
}

impl Observability {
    pub fn record_request(&mut self) {
        self.snapshot.requests = self.snapshot.requests.saturating_add(1);
    }

    pub fn record_admitted(&mut self) {
        self.snapshot.admitted = self.snapshot.admitted.saturating_add(1);
    }

    pub fn record_auth_failure(&mut self) {
        self.snapshot.auth_failures = self.snapshot.auth_failures.saturating_add(1);
    }

    pub fn record_validation_failure(&mut self) {
        self.snapshot.validation_failures = self.snapshot.validation_failures.saturating_add(1);
    }

    pub fn record_quota_exceeded(&mut self) {
        self.snapshot.quota_exceeded = self.snapshot.quota_exceeded.saturating_add(1);
    }

    pub fn record_rate_limited(&mut self) {
        self.snapshot.rate_limited = self.snapshot.rate_limited.saturating_add(1);
    }

    pub fn record_upstream_failure(&mut self) {
        self.snapshot.upstream_failures = self.snapshot.upstream_failures.saturating_add(1);
    }

    pub fn record_appended(&mut self) {
        self.snapshot.records_appended = self.snapshot.records_appended.saturating_add(1);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        self.snapshot.clone()
    }
}
