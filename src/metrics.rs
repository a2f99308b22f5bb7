//! Prometheus metrics for admission decisions.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gatekeeper_requests_admitted_total` - Requests that passed the rate limit stage
//! - `gatekeeper_requests_rate_limited_total` - Requests rejected with 429 by the rate limit stage
//! - `gatekeeper_auth_failures_total` - Failed authentications (label: reason)
//!
//! ## Histograms
//! - `gatekeeper_request_duration_seconds` - End-to-end request duration (labels: method, status)
//!
//! ## Gauges
//! - `gatekeeper_rate_limit_tracked_keys` - Client keys held after each eviction sweep (label: limiter)
//!
//! Recording functions are no-ops until [`init_metrics`] installs an exporter,
//! so they are safe to call from tests.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_ADMITTED_TOTAL: &str = "gatekeeper_requests_admitted_total";
    pub const REQUESTS_RATE_LIMITED_TOTAL: &str = "gatekeeper_requests_rate_limited_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gatekeeper_auth_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gatekeeper_request_duration_seconds";
    pub const RATE_LIMIT_TRACKED_KEYS: &str = "gatekeeper_rate_limit_tracked_keys";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_ADMITTED_TOTAL,
        "Total number of requests admitted by the rate limiter"
    );
    describe_counter!(
        names::REQUESTS_RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of failed bearer token authentications"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_KEYS,
        "Client keys currently tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_admitted() {
    counter!(names::REQUESTS_ADMITTED_TOTAL).increment(1);
}

pub fn record_rate_limited() {
    counter!(names::REQUESTS_RATE_LIMITED_TOTAL).increment(1);
}

/// Record a failed authentication. `reason` is a short static label.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_request_duration(method: &str, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Update the tracked key gauge for the named limiter.
pub fn set_tracked_keys(limiter: &'static str, count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_KEYS, "limiter" => limiter).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify the recorders don't panic without an installed exporter.

    #[test]
    fn test_record_counters() {
        record_admitted();
        record_rate_limited();
        record_auth_failure("missing");
    }

    #[test]
    fn test_record_request_duration() {
        record_request_duration("GET", 200, 0.01);
    }

    #[test]
    fn test_set_tracked_keys() {
        set_tracked_keys("requests", 0);
        set_tracked_keys("auth_failures", 42);
    }
}
