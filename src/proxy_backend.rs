use std::time::Duration;

use serde_json::Value;

use crate::error::GatewayError;

/// Upstream client. Forwards admitted requests verbatim with the configured
/// Bearer credential: one bounded attempt per call, no retries.
pub struct UpstreamClient {
    base_url: String,
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| GatewayError::UpstreamTransport {
                status: None,
                message: format!("invalid upstream credential: {err}"),
            })?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::UpstreamTransport {
                status: None,
                message: format!("upstream http client error: {err}"),
            })?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// One round trip. The upstream's status and JSON body pass through
    /// unmodified, including 4xx/5xx business errors; the gateway does not
    /// reinterpret them.
    pub async fn forward(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: &Value,
    ) -> Result<(u16, Value), GatewayError> {
        let url = join_base_url(&self.base_url, endpoint);
        let mut request = self.client.request(method.clone(), url);
        if sends_body(&method, body) {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        let payload: Value =
            serde_json::from_slice(&bytes).map_err(|_| GatewayError::UpstreamResponse)?;
        Ok((status, payload))
    }
}

fn sends_body(method: &reqwest::Method, body: &Value) -> bool {
    if *method == reqwest::Method::GET || *method == reqwest::Method::DELETE {
        return body.as_object().is_some_and(|map| !map.is_empty());
    }
    true
}

fn join_base_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = endpoint.strip_prefix('/').unwrap_or(endpoint);
    format!("{base}/v1/{path}")
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::UpstreamTimeout;
    }
    let status = err.status().map(|status| status.as_u16());
    GatewayError::UpstreamTransport {
        status,
        message: transport_failure_message(status),
    }
}

fn transport_failure_message(status: Option<u16>) -> String {
    let message = match status {
        Some(401) => "Authentication error with upstream",
        Some(429) => "Upstream rate limit exceeded",
        Some(500) | Some(502) | Some(503) | Some(504) => {
            "Upstream service temporarily unavailable"
        }
        _ => "Upstream API request failed",
    };
    message.to_string()
}
