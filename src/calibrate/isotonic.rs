//! Isotonic calibration: monotone step functions fit by Pool-Adjacent-Violators.
//!
//! Fitting is a batch job run by an offline trainer; at request time the
//! calibrator only evaluates the installed model for a source. Installing a
//! model swaps an `Arc`, so readers never block on a refit.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{clamp_unit, ScoreCalibrator, SoftClampCalibrator};
use crate::error::CalibrationError;
use crate::weights::normalize;

/// Knots of a monotone piecewise-linear map. `x` strictly increasing,
/// `y` non-decreasing, same length, never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Knots")]
pub struct IsotonicModel {
    x: Vec<f64>,
    y: Vec<f64>,
}

/// Serialized shape, validated on the way in.
#[derive(Debug, Deserialize)]
struct Knots {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TryFrom<Knots> for IsotonicModel {
    type Error = CalibrationError;

    fn try_from(k: Knots) -> Result<Self, Self::Error> {
        Self::from_knots(k.x, k.y)
    }
}

/// Pooled run of consecutive observations.
#[derive(Debug, Clone, Copy)]
struct Block {
    sum_x: f64,
    sum_y: f64,
    n: f64,
}

impl Block {
    fn mean_y(&self) -> f64 {
        self.sum_y / self.n
    }

    fn merge(&mut self, other: Block) {
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.n += other.n;
    }
}

impl IsotonicModel {
    /// Fit from labeled `(score, target)` pairs. Pairs with a non-finite
    /// member are skipped.
    pub fn fit(scores: &[f64], targets: &[f64]) -> Result<Self, CalibrationError> {
        if scores.len() != targets.len() {
            return Err(CalibrationError::LengthMismatch {
                scores: scores.len(),
                targets: targets.len(),
            });
        }

        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .copied()
            .zip(targets.iter().copied())
            .filter(|(s, t)| s.is_finite() && t.is_finite())
            .collect();
        if pairs.is_empty() {
            return Err(CalibrationError::NoData);
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Equal scores must map to one value, so pool ties up front.
        let mut tied: Vec<(f64, Block)> = Vec::with_capacity(pairs.len());
        for (s, t) in pairs {
            match tied.last_mut() {
                Some((x, block)) if *x == s => block.merge(Block {
                    sum_x: s,
                    sum_y: t,
                    n: 1.0,
                }),
                _ => tied.push((
                    s,
                    Block {
                        sum_x: s,
                        sum_y: t,
                        n: 1.0,
                    },
                )),
            }
        }

        // PAV: merge backwards while the previous block's mean exceeds ours.
        let mut stack: Vec<Block> = Vec::with_capacity(tied.len());
        for (_, block) in tied {
            stack.push(block);
            while stack.len() >= 2 {
                let last = stack[stack.len() - 1];
                let prev = stack[stack.len() - 2];
                if prev.mean_y() <= last.mean_y() {
                    break;
                }
                stack.pop();
                if let Some(top) = stack.last_mut() {
                    top.merge(last);
                }
            }
        }

        let x = stack.iter().map(|b| b.sum_x / b.n).collect();
        let y = stack.iter().map(Block::mean_y).collect();
        Ok(Self { x, y })
    }

    /// Build from precomputed knots, e.g. a model exported by a trainer.
    pub fn from_knots(x: Vec<f64>, y: Vec<f64>) -> Result<Self, CalibrationError> {
        let valid = !x.is_empty()
            && x.len() == y.len()
            && x.iter().chain(y.iter()).all(|v| v.is_finite())
            && x.windows(2).all(|w| w[0] < w[1])
            && y.windows(2).all(|w| w[0] <= w[1]);
        if !valid {
            return Err(CalibrationError::InvalidKnots);
        }
        Ok(Self { x, y })
    }

    pub fn knots(&self) -> (&[f64], &[f64]) {
        (&self.x, &self.y)
    }

    /// Linear interpolation between the bracketing knots; boundary knot
    /// value outside the fitted range. NaN maps to the lowest value.
    pub fn predict(&self, s: f64) -> f64 {
        let last = self.x.len() - 1;
        if s.is_nan() || s <= self.x[0] {
            return self.y[0];
        }
        if s >= self.x[last] {
            return self.y[last];
        }
        // x[i - 1] <= s < x[i], 1 <= i <= last
        let i = self.x.partition_point(|&k| k <= s);
        let (x0, x1) = (self.x[i - 1], self.x[i]);
        let (y0, y1) = (self.y[i - 1], self.y[i]);
        y0 + (y1 - y0) * (s - x0) / (x1 - x0)
    }
}

/// Evaluates per-source isotonic models; sources without one fall back to
/// the soft clamp.
#[derive(Debug, Default)]
pub struct IsotonicCalibrator {
    models: DashMap<String, Arc<IsotonicModel>>,
    fallback: SoftClampCalibrator,
}

impl IsotonicCalibrator {
    pub fn new(fallback: SoftClampCalibrator) -> Self {
        Self {
            models: DashMap::new(),
            fallback,
        }
    }

    /// Install or replace the model for a source.
    pub fn install(&self, source_id: &str, model: IsotonicModel) {
        debug!(target: "rankfuse::calibrate", source = source_id, knots = model.x.len(), "isotonic model installed");
        self.models.insert(normalize(source_id), Arc::new(model));
    }

    pub fn remove(&self, source_id: &str) -> bool {
        self.models.remove(&normalize(source_id)).is_some()
    }

    pub fn model(&self, source_id: &str) -> Option<Arc<IsotonicModel>> {
        self.models
            .get(&normalize(source_id))
            .map(|m| Arc::clone(m.value()))
    }
}

impl ScoreCalibrator for IsotonicCalibrator {
    fn normalize(&self, raw: f64, source_id: &str) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        match self.model(source_id) {
            Some(model) => clamp_unit(model.predict(raw)),
            None => self.fallback.normalize(raw, source_id),
        }
    }

    fn name(&self) -> &'static str {
        "isotonic"
    }
}
