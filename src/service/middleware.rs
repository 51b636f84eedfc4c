//! Service middleware for request metrics.
//!
//! ## Metrics Exposed
//!
//! - `request_metric` - path, method, status, latency per request
//! - `registration_metric` - outcome of each registration or referral write
//! - `leaderboard_metric` - size and latency of each leaderboard read

use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use regex_lite::Regex;
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing for now - can be upgraded to prometheus metrics later.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "referral_kernel::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

fn uuid_regex() -> &'static Regex {
    static UUID: OnceLock<Regex> = OnceLock::new();
    UUID.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("static UUID pattern")
    })
}

/// Normalize path for metrics to avoid high cardinality.
fn normalize_path(path: &str) -> String {
    uuid_regex().replace_all(path, ":id").to_string()
}

/// Record the outcome of a registration or referral write.
pub fn record_registration_metric(operation: &'static str, outcome: &str, latency_ms: u64) {
    info!(
        target: "referral_kernel::metrics",
        metric_type = "registration",
        operation = operation,
        outcome = outcome,
        latency_ms = latency_ms,
        "registration_metric"
    );
}

/// Record leaderboard computation metrics.
pub fn record_leaderboard_metric(entries: usize, latency_ms: u64) {
    info!(
        target: "referral_kernel::metrics",
        metric_type = "leaderboard",
        entries = entries,
        latency_ms = latency_ms,
        "leaderboard_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_uuid() {
        let path = "/api/registrations/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/registrations/:id");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/api/leaderboard"), "/api/leaderboard");
    }
}
