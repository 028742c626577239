use crate::error::{ApiError, Result};
use crate::metrics::Timer;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, Response},
};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest request body relayed upstream
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    /// Upstream base URL without a trailing slash
    pub upstream: String,
}

impl ProxyState {
    /// Create a new proxy state
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
        })
    }

    fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) => format!("{}{}?{}", self.upstream, path, q),
            None => format!("{}{}", self.upstream, path),
        }
    }
}

/// Relay a request to the upstream content API
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request,
) -> Result<Response<Body>> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path();

    let timer = Timer::new(method.to_string(), path.to_string());
    let upstream_url = state.upstream_url(path, uri.query());

    debug!(method = %method, upstream_url = %upstream_url, "Forwarding to upstream");

    let headers = req.headers().clone();
    let body_bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read request body: {}", e)))?;

    let response = send_request(
        &state.client,
        method.clone(),
        headers,
        body_bytes,
        &upstream_url,
    )
    .await;

    match &response {
        Ok(resp) => {
            info!(method = %method, path = %path, status = %resp.status(), "Request completed");
            timer.record(resp.status().as_u16());
        }
        Err(e) => {
            warn!(method = %method, path = %path, error = %e, "Request failed");
            timer.record(e.status_code().as_u16());
        }
    }

    response
}

/// Send request to the upstream service
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    upstream_url: &str,
) -> Result<Response<Body>> {
    let mut upstream_req = client.request(method, upstream_url).body(body_bytes);

    for (name, value) in headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) && *name != http::header::HOST {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            ApiError::Timeout(format!("Upstream request timed out: {}", e))
        } else if e.is_connect() {
            ApiError::Upstream(format!("Failed to connect to upstream: {}", e))
        } else {
            ApiError::Upstream(format!("Upstream request failed: {}", e))
        }
    })?;

    let mut response_builder = Response::builder().status(upstream_response.status());

    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    let body_bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| ApiError::Upstream(format!("Failed to read upstream response: {}", e)))?;

    response_builder
        .body(Body::from(body_bytes))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
