// src/guard.rs
//! Budget-guarded concurrency gate for one expensive operation.
//!
//! `run_with_budget` admits a call only if
//! 1. the caller still has at least `min_required` of its budget left, and
//! 2. a permit becomes free within `acquire_timeout`.
//!
//! Otherwise, or if the operation errors or panics, the caller gets its
//! fallback. The permit is an RAII guard, released on every path.

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::config::GuardSection;
use crate::metrics::{GUARD_ADMITTED, GUARD_FALLBACK, GUARD_PERMITS_AVAILABLE, RERANK_DURATION_MS};

/// Why a call was answered with its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Budget,
    Saturated,
    Failed,
    Panicked,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Budget => "budget",
            FallbackReason::Saturated => "saturated",
            FallbackReason::Failed => "failed",
            FallbackReason::Panicked => "panicked",
        }
    }
}

/// Cheap to clone; clones share the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    acquire_timeout: Duration,
    min_required: Duration,
}

impl ConcurrencyGuard {
    pub fn new(max_concurrency: usize, acquire_timeout_ms: u64, min_required_ms: u64) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            min_required: Duration::from_millis(min_required_ms),
        }
    }

    pub fn from_config(cfg: &GuardSection) -> Self {
        Self::new(
            cfg.max_concurrency,
            cfg.acquire_timeout_ms,
            cfg.min_required_ms,
        )
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn min_required(&self) -> Duration {
        self.min_required
    }

    /// Run `op` if budget and capacity allow, else return `fallback()`.
    ///
    /// `op` is never invoked when `remaining < min_required`.
    pub async fn run_with_budget<T, E, Op, Fut, Fb>(
        &self,
        remaining: Duration,
        op: Op,
        fallback: Fb,
    ) -> T
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        Fb: FnOnce() -> T,
    {
        if remaining < self.min_required {
            debug!(
                target: "rankfuse::guard",
                remaining_ms = remaining.as_millis() as u64,
                min_required_ms = self.min_required.as_millis() as u64,
                "budget below minimum; skipping"
            );
            return self.fall_back(FallbackReason::Budget, fallback);
        }

        let permit = match timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(p)) => p,
            Ok(Err(_)) | Err(_) => {
                debug!(
                    target: "rankfuse::guard",
                    acquire_timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "no permit in time; skipping"
                );
                return self.fall_back(FallbackReason::Saturated, fallback);
            }
        };
        counter!(GUARD_ADMITTED).increment(1);
        gauge!(GUARD_PERMITS_AVAILABLE).set(self.permits.available_permits() as f64);

        let started = Instant::now();
        let outcome = AssertUnwindSafe(async move { op().await })
            .catch_unwind()
            .await;
        drop(permit);
        histogram!(RERANK_DURATION_MS).record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(target: "rankfuse::guard", error = %e, "guarded operation failed");
                self.fall_back(FallbackReason::Failed, fallback)
            }
            Err(_) => {
                warn!(target: "rankfuse::guard", "guarded operation panicked");
                self.fall_back(FallbackReason::Panicked, fallback)
            }
        }
    }

    fn fall_back<T, Fb: FnOnce() -> T>(&self, reason: FallbackReason, fallback: Fb) -> T {
        counter!(GUARD_FALLBACK, "reason" => reason.as_str()).increment(1);
        fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ENOUGH: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn admits_and_returns_value() {
        let g = ConcurrencyGuard::new(1, 50, 10);
        let v = g
            .run_with_budget(ENOUGH, || async { Ok::<_, String>(7) }, || 0)
            .await;
        assert_eq!(v, 7);
        assert_eq!(g.available_permits(), 1);
    }

    #[tokio::test]
    async fn low_budget_never_invokes_op() {
        let g = ConcurrencyGuard::new(1, 50, 120);
        let calls = AtomicUsize::new(0);
        let v = g
            .run_with_budget(
                Duration::from_millis(119),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(1)
                },
                || -1,
            )
            .await;
        assert_eq!(v, -1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_returns_fallback_and_releases_permit() {
        let g = ConcurrencyGuard::new(1, 0, 0);
        for _ in 0..5 {
            let v = g
                .run_with_budget(ENOUGH, || async { Err::<i32, _>("boom") }, || 42)
                .await;
            assert_eq!(v, 42);
        }
        assert_eq!(g.available_permits(), 1);
    }

    #[tokio::test]
    async fn saturated_guard_falls_back() {
        let g = ConcurrencyGuard::new(1, 10, 0);
        let held = g.permits.clone().acquire_owned().await.unwrap();
        let v = g
            .run_with_budget(ENOUGH, || async { Ok::<_, String>(1) }, || 2)
            .await;
        assert_eq!(v, 2);
        drop(held);
        let v = g
            .run_with_budget(ENOUGH, || async { Ok::<_, String>(1) }, || 2)
            .await;
        assert_eq!(v, 1);
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        assert_eq!(ConcurrencyGuard::new(0, 1, 1).max_concurrency(), 1);
    }
}
