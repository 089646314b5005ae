//! Metric names, descriptions, and the Prometheus recorder.
//!
//! The library only emits through the `metrics` facade; installing a recorder
//! is up to the embedding process (or tests).

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const GUARD_ADMITTED: &str = "rankfuse_guard_admitted_total";
pub const GUARD_FALLBACK: &str = "rankfuse_guard_fallback_total";
pub const GUARD_PERMITS_AVAILABLE: &str = "rankfuse_guard_permits_available";
pub const FLIGHT_EXECUTIONS: &str = "rankfuse_single_flight_executions_total";
pub const FLIGHT_JOINED: &str = "rankfuse_single_flight_joined_total";
pub const FLIGHT_TIMEOUTS: &str = "rankfuse_single_flight_timeouts_total";
pub const READINESS_CHECKS: &str = "rankfuse_readiness_ready_total";
pub const CALIBRATION_COLD_START: &str = "rankfuse_calibration_cold_start_total";
pub const RERANK_DURATION_MS: &str = "rankfuse_rerank_duration_ms";

/// Register descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    describe_counter!(GUARD_ADMITTED, "Rerank calls admitted by the concurrency guard");
    describe_counter!(
        GUARD_FALLBACK,
        "Rerank calls answered with the fallback, by reason"
    );
    describe_gauge!(GUARD_PERMITS_AVAILABLE, "Free rerank permits after the last admission");
    describe_counter!(FLIGHT_EXECUTIONS, "Single-flight task executions started");
    describe_counter!(FLIGHT_JOINED, "Callers attached to an in-flight execution");
    describe_counter!(FLIGHT_TIMEOUTS, "Single-flight waits that timed out");
    describe_counter!(READINESS_CHECKS, "Readiness gate evaluations, by outcome");
    describe_counter!(
        CALIBRATION_COLD_START,
        "Min-max normalizations answered with the cold-start score"
    );
    describe_histogram!(
        RERANK_DURATION_MS,
        Unit::Milliseconds,
        "Wall time of admitted rerank executions"
    );
}

/// Install a global Prometheus recorder and return its handle.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}
