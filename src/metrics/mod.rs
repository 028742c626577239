use crate::error::{ApiError, Result};
use crate::rate_limit::types::{Decision, Tier};
use axum::{extract::State, http::header, response::IntoResponse};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ApiError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "songbook_edge_requests_total",
            "Total number of HTTP requests relayed to the upstream"
        );
        describe_histogram!(
            "songbook_edge_request_duration_seconds",
            "Upstream round-trip latencies in seconds"
        );
        describe_counter!(
            "songbook_edge_rate_limit_decisions_total",
            "Rate limiter decisions by tier, endpoint category and outcome"
        );
        describe_counter!(
            "songbook_edge_rate_limit_store_failures_total",
            "Rate limit evaluations that failed open"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record one limiter decision
pub fn record_rate_limit_decision(tier: Tier, category: &str, decision: &Decision) {
    let outcome = match decision {
        Decision::Allow(_) => "allowed",
        Decision::Reject(_) => "rejected",
        Decision::FailOpen => "fail_open",
    };
    let labels = [
        ("tier", tier.as_str().to_string()),
        ("category", category.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("songbook_edge_rate_limit_decisions_total", &labels).increment(1);

    if matches!(decision, Decision::FailOpen) {
        counter!("songbook_edge_rate_limit_store_failures_total").increment(1);
    }
}

/// Record a relayed request
pub fn record_request(method: &str, path: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!("songbook_edge_requests_total", &labels).increment(1);
    histogram!("songbook_edge_request_duration_seconds", &labels).record(duration);
}

/// Replace id-like path segments to keep label cardinality bounded
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| if is_likely_id(seg) { ":id" } else { seg })
        .collect::<Vec<_>>()
        .join("/")
}

/// Numeric ids, UUIDs and long mixed alphanumeric tokens (Firebase uids, slugs with hashes)
fn is_likely_id(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    if segment.len() >= 32 && segment.contains('-') {
        return segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    }

    if segment.len() > 10 && segment.chars().all(|c| c.is_ascii_alphanumeric()) {
        let has_numbers = segment.chars().any(|c| c.is_ascii_digit());
        let has_letters = segment.chars().any(|c| c.is_ascii_alphabetic());
        return has_numbers && has_letters;
    }

    false
}

/// Timer for measuring upstream round trips
pub struct Timer {
    start: Instant,
    method: String,
    path: String,
}

impl Timer {
    pub fn new(method: String, path: String) -> Self {
        Self {
            start: Instant::now(),
            method,
            path,
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(&self.method, &self.path, status, duration);
    }
}
