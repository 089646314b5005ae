//! # Readiness Gate
//! Adaptive source weighting driven by accumulated online statistics.
//!
//! Policy (asymmetric on purpose):
//! - ready (`seen >= threshold && dim > 0`): boost the designated source,
//!   damp the other designated source, on top of the base weight.
//! - not ready, collaborator missing, or collaborator failing: cap the
//!   designated source at `unready_cap`; never boost.

use metrics::counter;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::ReadinessSection;
use crate::error::ReadinessError;
use crate::metrics::READINESS_CHECKS;
use crate::weights::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub observations_seen: i64,
    pub dimension: usize,
}

/// Read side of the statistics collaborator.
pub trait ReadinessSource: Send + Sync {
    fn snapshot(&self) -> Result<ReadinessSnapshot, ReadinessError>;
}

/// In-process statistics. Written by an accumulation path outside the
/// ranking core, read by every request.
#[derive(Debug, Default)]
pub struct ReadinessState {
    observations_seen: AtomicI64,
    dimension: AtomicUsize,
}

impl ReadinessState {
    pub fn new(dimension: usize) -> Self {
        Self {
            observations_seen: AtomicI64::new(0),
            dimension: AtomicUsize::new(dimension),
        }
    }

    /// Add `n` observations. Non-positive `n` is ignored, so the count only grows.
    pub fn record(&self, n: i64) {
        if n > 0 {
            let _ = self
                .observations_seen
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                    Some(cur.saturating_add(n))
                });
        }
    }

    pub fn set_dimension(&self, dimension: usize) {
        self.dimension.store(dimension, Ordering::Release);
    }

    pub fn observations_seen(&self) -> i64 {
        self.observations_seen.load(Ordering::Acquire)
    }

    /// Administrative reset; the only way the count goes down.
    pub fn reset(&self) {
        self.observations_seen.store(0, Ordering::Release);
    }
}

impl ReadinessSource for ReadinessState {
    fn snapshot(&self) -> Result<ReadinessSnapshot, ReadinessError> {
        Ok(ReadinessSnapshot {
            observations_seen: self.observations_seen.load(Ordering::Acquire),
            dimension: self.dimension.load(Ordering::Acquire),
        })
    }
}

/// Outcome of one gate evaluation; taken once per fusion call so every
/// bundle of a request sees the same decision.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub ready: bool,
    boost_source: String,
    damp_source: String,
    boost: f64,
    damp: f64,
    unready_cap: f64,
}

impl GateDecision {
    /// Weight for a canonical source type given its base weight.
    pub fn adjust(&self, canonical_type: &str, base: f64) -> f64 {
        let t = normalize(canonical_type);
        if self.ready {
            if t == self.boost_source {
                base * self.boost
            } else if t == self.damp_source {
                base * self.damp
            } else {
                base
            }
        } else if t == self.boost_source {
            base.min(self.unready_cap)
        } else {
            base
        }
    }
}

#[derive(Clone)]
pub struct ReadinessGate {
    source: Option<Arc<dyn ReadinessSource>>,
    settings: ReadinessSection,
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("has_source", &self.source.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ReadinessGate {
    pub fn new(source: Option<Arc<dyn ReadinessSource>>, settings: ReadinessSection) -> Self {
        Self { source, settings }
    }

    /// Gate with no statistics collaborator: permanently "not ready".
    pub fn detached(settings: ReadinessSection) -> Self {
        Self::new(None, settings)
    }

    pub fn evaluate(&self) -> GateDecision {
        let (ready, seen, dim) = match self.source.as_ref().map(|s| s.snapshot()) {
            Some(Ok(snap)) => (
                snap.observations_seen >= self.settings.ready_seen_threshold
                    && snap.dimension > 0,
                snap.observations_seen,
                snap.dimension as i64,
            ),
            Some(Err(e)) => {
                debug!(target: "rankfuse::readiness", error = %e, "readiness unavailable; treating as not ready");
                (false, -1, -1)
            }
            None => (false, -1, -1),
        };

        debug!(
            target: "rankfuse::readiness",
            ready, seen, dim,
            boost = self.settings.boost,
            damp = self.settings.damp,
            "readiness evaluated"
        );
        counter!(READINESS_CHECKS, "ready" => if ready { "true" } else { "false" }).increment(1);

        GateDecision {
            ready,
            boost_source: normalize(&self.settings.boost_source),
            damp_source: normalize(&self.settings.damp_source),
            boost: self.settings.boost,
            damp: self.settings.damp,
            unready_cap: self.settings.unready_cap,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.evaluate().ready
    }
}
