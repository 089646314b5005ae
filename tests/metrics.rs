// tests/metrics.rs
//
// The Prometheus recorder is process-global, so it is installed once per
// test binary and the tests touching it run serially.

use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

use rankfuse::calibrate::{MinMaxCalibrator, ScoreCalibrator};
use rankfuse::config::ReadinessSection;
use rankfuse::metrics::install_prometheus;
use rankfuse::{ConcurrencyGuard, ReadinessGate, ReadinessState, SingleFlight};

static HANDLE: Lazy<PrometheusHandle> =
    Lazy::new(|| install_prometheus().expect("install prometheus recorder"));

#[serial_test::serial]
#[tokio::test]
async fn exposition_contains_expected_series() {
    let handle = &*HANDLE;

    let guard = ConcurrencyGuard::new(1, 10, 100);
    let _ = guard
        .run_with_budget(Duration::from_millis(5), || async { Ok::<_, String>(1) }, || 0)
        .await;
    let _ = guard
        .run_with_budget(Duration::from_secs(1), || async { Ok::<_, String>(1) }, || 0)
        .await;

    let sf = SingleFlight::<u8>::new(1, 500);
    let _ = sf.run("m", || async { Ok::<_, String>(1) }).await;

    let gate = ReadinessGate::new(
        Some(Arc::new(ReadinessState::new(0))),
        ReadinessSection::default(),
    );
    let _ = gate.is_ready();

    let _ = MinMaxCalibrator::new().normalize(1.0, "s");

    let text = handle.render();
    for needle in [
        "rankfuse_guard_admitted",
        "rankfuse_guard_fallback",
        "reason=\"budget\"",
        "rankfuse_guard_permits_available",
        "rankfuse_rerank_duration_ms",
        "rankfuse_single_flight_executions",
        "rankfuse_readiness_ready",
        "ready=\"false\"",
        "rankfuse_calibration_cold_start",
    ] {
        assert!(text.contains(needle), "missing {needle} in:\n{text}");
    }
}
