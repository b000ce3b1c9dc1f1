use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the Prometheus recorder and describes every metric name used
/// below. Call once at startup.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_metrics();
    handle
}

fn describe_metrics() {
    describe_counter!("proxy_requests_total", "Total downstream requests by dialect");
    describe_counter!("proxy_engine_attempts_total", "Anti-truncation attempts opened, by dialect");
    describe_counter!("proxy_engine_retries_total", "Retries triggered, by dialect and reason");
    describe_counter!("proxy_engine_marker_found_total", "Requests that completed via marker detection");
    describe_counter!("proxy_engine_exhausted_total", "Requests that exhausted max attempts without the marker");
    describe_histogram!("proxy_request_duration_seconds", "Downstream request duration in seconds");
    describe_gauge!("proxy_build_info", "Build version information");

    gauge!("proxy_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_request(dialect: &str, endpoint: &str) {
    counter!("proxy_requests_total", "dialect" => dialect.to_string(), "endpoint" => endpoint.to_string())
        .increment(1);
}

pub fn record_attempt(dialect: &str) {
    counter!("proxy_engine_attempts_total", "dialect" => dialect.to_string()).increment(1);
}

pub fn record_retry(dialect: &str, reason: &str) {
    counter!(
        "proxy_engine_retries_total",
        "dialect" => dialect.to_string(),
        "reason" => reason.to_string(),
    )
    .increment(1);
}

pub fn record_marker_found(dialect: &str) {
    counter!("proxy_engine_marker_found_total", "dialect" => dialect.to_string()).increment(1);
}

pub fn record_exhausted(dialect: &str) {
    counter!("proxy_engine_exhausted_total", "dialect" => dialect.to_string()).increment(1);
}

pub fn record_duration(dialect: &str, endpoint: &str, duration: Duration) {
    histogram!(
        "proxy_request_duration_seconds",
        "dialect" => dialect.to_string(),
        "endpoint" => endpoint.to_string(),
    )
    .record(duration.as_secs_f64());
}
