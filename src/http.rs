use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::admission::AdmissionGate;
use crate::error::GatewayError;
use crate::observability::{Observability, ObservabilitySnapshot};
use crate::proxy_backend::UpstreamClient;
use crate::recorder::UsageRecorder;
use crate::utc_timestamp;

const USER_ID_HEADER: &str = "x-wp-user-id";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct GatewayHttpState {
    gate: Arc<AdmissionGate>,
    upstream: Arc<UpstreamClient>,
    recorder: Arc<UsageRecorder>,
    observability: Arc<Mutex<Observability>>,
}

impl GatewayHttpState {
    pub fn new(gate: AdmissionGate, upstream: UpstreamClient, recorder: UsageRecorder) -> Self {
        Self {
            gate: Arc::new(gate),
            upstream: Arc::new(upstream),
            recorder: Arc::new(recorder),
            observability: Arc::new(Mutex::new(Observability::default())),
        }
    }

    pub async fn observability_snapshot(&self) -> ObservabilitySnapshot {
        self.observability.lock().await.snapshot()
    }
}

pub fn router(state: GatewayHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/*path", any(handle_proxy))
        .fallback(handle_fallback)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<GatewayHttpState>) -> Json<ObservabilitySnapshot> {
    Json(state.observability_snapshot().await)
}

async fn handle_fallback() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not found",
            "timestamp_utc": utc_timestamp(),
        })),
    )
}

async fn handle_proxy(
    State(state): State<GatewayHttpState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Response {
    state.observability.lock().await.record_request();

    let endpoint = match uri.path().strip_prefix("/v1") {
        Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
        _ => return handle_fallback().await.into_response(),
    };

    let user_id = match require_user_id(&headers) {
        Ok(user_id) => user_id,
        Err(err) => {
            state.observability.lock().await.record_auth_failure();
            return render_error(&err, None);
        }
    };

    let api_key = match require_api_key(&headers, &uri) {
        Ok(api_key) => api_key,
        Err(err) => {
            state.observability.lock().await.record_auth_failure();
            return render_error(&err, Some(user_id));
        }
    };

    let request_body: Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => {
                state.observability.lock().await.record_validation_failure();
                let mut details = crate::FieldErrors::new();
                details.insert(
                    "body".to_string(),
                    vec!["must be valid JSON".to_string()],
                );
                return render_error(&GatewayError::Validation { details }, Some(user_id));
            }
        }
    };

    let admission = match state
        .gate
        .admit(user_id, &api_key, &endpoint, &request_body)
        .await
    {
        Ok(admission) => admission,
        Err(err) => {
            observe_rejection(&state, &err).await;
            return render_error(&err, Some(user_id));
        }
    };
    state.observability.lock().await.record_admitted();
    tracing::debug!(
        user_id,
        endpoint = %endpoint,
        estimated_tokens = admission.estimate.total_tokens,
        remaining_tokens = admission.remaining_tokens,
        "request admitted"
    );

    let ip_address = caller_ip(&headers, connect_info);

    let (status, response_body) = match state
        .upstream
        .forward(method.clone(), &endpoint, &request_body)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            state.observability.lock().await.record_upstream_failure();
            // The call was forwarded; the failure still enters the audit trail.
            let payload = error_payload(&err, Some(user_id));
            state
                .recorder
                .record(
                    &admission.allocation,
                    &endpoint,
                    method.as_str(),
                    &request_body,
                    err.status_code(),
                    &payload,
                    ip_address,
                )
                .await;
            state.observability.lock().await.record_appended();
            return respond(err.status_code(), payload);
        }
    };

    state
        .recorder
        .record(
            &admission.allocation,
            &endpoint,
            method.as_str(),
            &request_body,
            status,
            &response_body,
            ip_address,
        )
        .await;
    state.observability.lock().await.record_appended();

    respond(status, response_body)
}

fn require_user_id(headers: &HeaderMap) -> Result<u64, GatewayError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| GatewayError::authentication("WordPress User ID is required"))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| GatewayError::authentication("Invalid user ID"))
}

fn require_api_key(headers: &HeaderMap, uri: &Uri) -> Result<String, GatewayError> {
    if let Some(api_key) = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|api_key| !api_key.is_empty())
    {
        return Ok(api_key.to_string());
    }
    api_key_from_query(uri.query())
        .ok_or_else(|| GatewayError::authentication("API key is required"))
}

fn api_key_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == "api_key" && !value.is_empty()).then(|| value.to_string())
    })
}

fn caller_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    forwarded.or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

async fn observe_rejection(state: &GatewayHttpState, err: &GatewayError) {
    let mut observability = state.observability.lock().await;
    match err {
        GatewayError::Authentication { .. } => observability.record_auth_failure(),
        GatewayError::Validation { .. } => observability.record_validation_failure(),
        GatewayError::QuotaExceeded { .. } => observability.record_quota_exceeded(),
        GatewayError::RateLimited => observability.record_rate_limited(),
        _ => observability.record_upstream_failure(),
    }
}

/// Error bodies share one shape: `error`, `timestamp_utc`, plus per-kind
/// context fields.
fn error_payload(err: &GatewayError, user_id: Option<u64>) -> Value {
    let mut payload = json!({
        "error": err.to_string(),
        "timestamp_utc": utc_timestamp(),
    });

    match err {
        GatewayError::Validation { details } => {
            payload["details"] = serde_json::to_value(details).unwrap_or(Value::Null);
        }
        GatewayError::QuotaExceeded {
            remaining,
            estimated_required,
        } => {
            payload["remaining_tokens"] = (*remaining).into();
            payload["estimated_required"] = (*estimated_required).into();
        }
        GatewayError::Authentication { .. }
        | GatewayError::RateLimited
        | GatewayError::UpstreamTransport { .. }
        | GatewayError::UpstreamTimeout
        | GatewayError::UpstreamResponse => {
            if let Some(user_id) = user_id {
                payload["wp_user_id"] = user_id.into();
            }
        }
        GatewayError::Ledger(err) => {
            tracing::error!(%err, "ledger failure surfaced to a request");
        }
    }

    payload
}

fn render_error(err: &GatewayError, user_id: Option<u64>) -> Response {
    respond(err.status_code(), error_payload(err, user_id))
}

fn respond(status: u16, payload: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(payload)).into_response()
}
