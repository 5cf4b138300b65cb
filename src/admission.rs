use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::Clock;
use crate::costing::{self, CostEstimate};
use crate::error::GatewayError;
use crate::keys::{ApiKeyAllocation, KeyResolver};
use crate::ledger::UsageLedger;
use crate::limits::{RateLimitConfig, RateLimiter};
use crate::token_count::TextEncoder;
use crate::validate;

/// A granted admission: the request may be forwarded.
#[derive(Clone, Debug)]
pub struct Admission {
    pub allocation: ApiKeyAllocation,
    pub estimate: CostEstimate,
    pub remaining_tokens: u64,
}

/// Pre-flight gate. Resolves the credential, derives the remaining budget
/// from the ledger, validates shape, estimates cost, then rate-limits,
/// short-circuiting on the first failure. Nothing is forwarded or recorded
/// for a rejected request.
pub struct AdmissionGate {
    keys: Arc<dyn KeyResolver>,
    ledger: Arc<UsageLedger>,
    limiter: Mutex<RateLimiter>,
    rate_limit: RateLimitConfig,
    encoder: Arc<TextEncoder>,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    pub fn new(
        keys: Arc<dyn KeyResolver>,
        ledger: Arc<UsageLedger>,
        rate_limit: RateLimitConfig,
        encoder: Arc<TextEncoder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            ledger,
            limiter: Mutex::new(RateLimiter::default()),
            rate_limit,
            encoder,
            clock,
        }
    }

    pub async fn admit(
        &self,
        user_id: u64,
        api_key: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<Admission, GatewayError> {
        let allocation = self
            .keys
            .resolve(api_key)
            .await
            .ok_or_else(|| GatewayError::authentication("Invalid or inactive API key"))?;
        if !allocation.is_active || allocation.wp_user_id != user_id {
            return Err(GatewayError::authentication("Invalid or inactive API key"));
        }

        // Remaining budget always derives from the durable history, never
        // from the allocation's own counter.
        let summary = self.ledger.summarize(user_id).await?;
        let remaining = allocation
            .total_tokens_allocated
            .saturating_sub(summary.total_tokens);

        validate::validate_request(endpoint, body)
            .map_err(|details| GatewayError::Validation { details })?;

        let estimate = costing::estimate(&self.encoder, endpoint, body);
        if estimate.total_tokens > remaining {
            return Err(GatewayError::QuotaExceeded {
                remaining,
                estimated_required: estimate.total_tokens,
            });
        }

        let now = self.clock.now_epoch_seconds();
        let admitted =
            self.limiter
                .lock()
                .await
                .check_and_increment(user_id, &self.rate_limit, now);
        if !admitted {
            return Err(GatewayError::RateLimited);
        }

        Ok(Admission {
            allocation,
            estimate,
            remaining_tokens: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{FileKeyStore, KeyStateFile};
    use serde_json::json;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_epoch_seconds(&self) -> u64 {
            self.0
        }
    }

    fn allocation(api_key: &str, user_id: u64, total: u64) -> ApiKeyAllocation {
        ApiKeyAllocation {
            id: 1,
            api_key: api_key.to_string(),
            wp_user_id: user_id,
            total_tokens_allocated: total,
            tokens_used: 0,
            is_active: true,
        }
    }

    fn gate(keys: Vec<ApiKeyAllocation>, ledger: Arc<UsageLedger>, max_calls: u32) -> AdmissionGate {
        AdmissionGate::new(
            Arc::new(FileKeyStore::new(KeyStateFile { keys })),
            ledger,
            RateLimitConfig {
                window_seconds: 60,
                max_calls,
            },
            Arc::new(TextEncoder::new()),
            Arc::new(FixedClock(1000)),
        )
    }

    fn temp_ledger() -> (tempfile::TempDir, Arc<UsageLedger>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Arc::new(UsageLedger::new(dir.path()).expect("ledger"));
        (dir, ledger)
    }

    #[tokio::test]
    async fn unknown_key_is_an_authentication_failure() {
        let (_dir, ledger) = temp_ledger();
        let gate = gate(vec![], ledger, 60);
        let err = gate
            .admit(1, "sk-missing", "/completions", &json!({"prompt": "hi"}))
            .await
            .expect_err("rejected");
        assert!(matches!(err, GatewayError::Authentication { .. }));
    }

    #[tokio::test]
    async fn inactive_or_mismatched_keys_are_rejected() {
        let (_dir, ledger) = temp_ledger();
        let mut inactive = allocation("sk-a", 1, 1000);
        inactive.is_active = false;
        let gate = gate(vec![inactive, allocation("sk-b", 2, 1000)], ledger, 60);

        let err = gate
            .admit(1, "sk-a", "/completions", &json!({"prompt": "hi"}))
            .await
            .expect_err("inactive");
        assert!(matches!(err, GatewayError::Authentication { .. }));

        let err = gate
            .admit(1, "sk-b", "/completions", &json!({"prompt": "hi"}))
            .await
            .expect_err("wrong user");
        assert!(matches!(err, GatewayError::Authentication { .. }));
    }

    #[tokio::test]
    async fn estimate_over_remaining_budget_is_quota_exceeded() {
        let (_dir, ledger) = temp_ledger();
        ledger
            .append(&crate::ledger::UsageRecord {
                timestamp_utc: "2026-01-01 00:00:00".to_string(),
                api_key_id: 1,
                wp_user_id: 1,
                endpoint: "/images/generations".to_string(),
                method: "POST".to_string(),
                tokens_used: 950,
                ip_address: None,
                request_data: json!({}),
                response_data: json!({}),
                response_status: 200,
            })
            .await
            .expect("append");

        let gate = gate(vec![allocation("sk-a", 1, 1000)], ledger, 60);
        let err = gate
            .admit(
                1,
                "sk-a",
                "/images/generations",
                &json!({"prompt": "a barn", "size": "256x256"}),
            )
            .await
            .expect_err("quota");
        match err {
            GatewayError::QuotaExceeded {
                remaining,
                estimated_required,
            } => {
                assert_eq!(remaining, 50);
                assert!(estimated_required >= 1000);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_runs_before_estimation() {
        let (_dir, ledger) = temp_ledger();
        let gate = gate(vec![allocation("sk-a", 1, 10)], ledger, 60);
        let err = gate
            .admit(1, "sk-a", "/chat/completions", &json!({}))
            .await
            .expect_err("invalid shape");
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn window_capacity_rejects_with_rate_limited() {
        let (_dir, ledger) = temp_ledger();
        let gate = gate(vec![allocation("sk-a", 1, 1_000_000)], ledger, 2);
        let body = json!({"prompt": "hi"});

        assert!(gate.admit(1, "sk-a", "/completions", &body).await.is_ok());
        assert!(gate.admit(1, "sk-a", "/completions", &body).await.is_ok());
        let err = gate
            .admit(1, "sk-a", "/completions", &body)
            .await
            .expect_err("limited");
        assert!(matches!(err, GatewayError::RateLimited));
    }

    #[tokio::test]
    async fn admission_reports_remaining_budget_from_the_ledger() {
        let (_dir, ledger) = temp_ledger();
        let gate = gate(vec![allocation("sk-a", 1, 5000)], ledger, 60);
        let admission = gate
            .admit(1, "sk-a", "/completions", &json!({"prompt": "hi"}))
            .await
            .expect("admitted");
        assert_eq!(admission.remaining_tokens, 5000);
        assert!(admission.estimate.total_tokens > 0);
    }
}
