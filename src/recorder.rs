use std::sync::Arc;

use serde_json::{Value, json};

use crate::costing;
use crate::keys::{ApiKeyAllocation, KeyResolver};
use crate::ledger::{UsageLedger, UsageRecord};
use crate::token_count::TextEncoder;
use crate::utc_timestamp;

/// Post-response accounting. Never fails the request: a ledger or key-state
/// write failure goes to the operational log while the proxied response
/// still returns to the caller.
pub struct UsageRecorder {
    ledger: Arc<UsageLedger>,
    keys: Arc<dyn KeyResolver>,
    encoder: Arc<TextEncoder>,
}

impl UsageRecorder {
    pub fn new(
        ledger: Arc<UsageLedger>,
        keys: Arc<dyn KeyResolver>,
        encoder: Arc<TextEncoder>,
    ) -> Self {
        Self {
            ledger,
            keys,
            encoder,
        }
    }

    /// Appends a usage record for a completed proxy call (success or handled
    /// failure) and charges the actual consumption against the key. Returns
    /// the tokens charged.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        allocation: &ApiKeyAllocation,
        endpoint: &str,
        method: &str,
        request_body: &Value,
        response_status: u16,
        response_body: &Value,
        ip_address: Option<String>,
    ) -> u64 {
        let tokens_used = if costing::is_image_endpoint(endpoint) {
            // The upstream reports no token usage for image calls; re-run
            // the image estimator against the request instead.
            let estimate = costing::image_cost(&self.encoder, request_body);
            if let Some(breakdown) = &estimate.breakdown {
                tracing::debug!(
                    size = %breakdown.size,
                    operation = breakdown.operation.as_str(),
                    base_cost = breakdown.base_cost,
                    num_images = breakdown.num_images,
                    prompt_cost = breakdown.prompt_cost,
                    "image usage recomputed"
                );
            }
            estimate.total_tokens
        } else {
            response_body
                .get("usage")
                .and_then(|usage| usage.get("total_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };

        let record = UsageRecord {
            timestamp_utc: utc_timestamp(),
            api_key_id: allocation.id,
            wp_user_id: allocation.wp_user_id,
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            tokens_used,
            ip_address,
            request_data: json!({
                "endpoint": endpoint,
                "params": request_body,
            }),
            response_data: json!({
                "usage": response_body.get("usage").cloned().unwrap_or(Value::Null),
                "model": response_body.get("model").cloned().unwrap_or(Value::Null),
            }),
            response_status,
        };

        if let Err(err) = self.ledger.append(&record).await {
            tracing::error!(
                wp_user_id = allocation.wp_user_id,
                api_key_id = allocation.id,
                %err,
                "failed to append usage record"
            );
        }

        match self.keys.record_spent(&allocation.api_key, tokens_used).await {
            Ok(outcome) if outcome.overran() => {
                // Already forwarded; overruns are recorded, not rejected.
                tracing::warn!(
                    wp_user_id = allocation.wp_user_id,
                    api_key_id = allocation.id,
                    tokens_used = outcome.tokens_used,
                    total_tokens_allocated = outcome.total_tokens_allocated,
                    "allocation exceeded after forwarding"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(api_key_id = allocation.id, %err, "failed to persist spent tokens");
            }
        }

        tokens_used
    }
}
