//! Online Min-Max calibration with lock-free per-source bounds.
//!
//! Bounds live in a `DashMap<source, Arc<Bounds>>`; the map shard lock is
//! held only to find or create the entry. Updates are compare-and-swap on the
//! `f64` bit patterns, so concurrent requests never serialize on a source.
//!
//! Cold start: until a source has seen two distinct finite values its bounds
//! are degenerate and `normalize` answers [`COLD_START_SCORE`] ("unknown"),
//! which is distinct from `0.0` ("equal to the lowest value seen").

use dashmap::DashMap;
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{clamp_unit, ScoreCalibrator};
use crate::metrics::CALIBRATION_COLD_START;

pub const COLD_START_SCORE: f64 = 0.5;

#[derive(Debug)]
struct Bounds {
    min: AtomicU64,
    max: AtomicU64,
}

impl Bounds {
    fn new() -> Self {
        Self {
            min: AtomicU64::new(f64::INFINITY.to_bits()),
            max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }

    fn observe(&self, x: f64) {
        let _ = self
            .min
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (x < f64::from_bits(cur)).then_some(x.to_bits())
            });
        let _ = self
            .max
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (x > f64::from_bits(cur)).then_some(x.to_bits())
            });
    }

    fn get(&self) -> (f64, f64) {
        (
            f64::from_bits(self.min.load(Ordering::Acquire)),
            f64::from_bits(self.max.load(Ordering::Acquire)),
        )
    }
}

/// Running `(min, max)` per source id. One instance per process, injected.
#[derive(Debug, Default)]
pub struct MinMaxCalibrator {
    bounds: DashMap<String, Arc<Bounds>>,
}

impl MinMaxCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, source_id: &str) -> Arc<Bounds> {
        if let Some(b) = self.bounds.get(source_id) {
            return Arc::clone(b.value());
        }
        Arc::clone(
            self.bounds
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(Bounds::new()))
                .value(),
        )
    }

    /// Current `(min, max)` for a source, if it has seen a finite value.
    pub fn bounds(&self, source_id: &str) -> Option<(f64, f64)> {
        let (min, max) = self.bounds.get(source_id)?.get();
        (min.is_finite() && max.is_finite()).then_some((min, max))
    }

    /// Administrative reset of one source.
    pub fn reset(&self, source_id: &str) {
        self.bounds.remove(source_id);
    }
}

impl ScoreCalibrator for MinMaxCalibrator {
    fn normalize(&self, raw: f64, source_id: &str) -> f64 {
        // Non-finite input scores 0 and never widens the bounds.
        if !raw.is_finite() {
            return 0.0;
        }
        let bounds = self.entry(source_id);
        bounds.observe(raw);
        let (min, max) = bounds.get();

        if !(min.is_finite() && max.is_finite()) || max <= min {
            counter!(CALIBRATION_COLD_START).increment(1);
            return COLD_START_SCORE;
        }
        clamp_unit((raw - min) / (max - min))
    }

    fn name(&self) -> &'static str {
        "minmax"
    }
}
