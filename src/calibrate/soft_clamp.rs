//! Stateless law-based calibration for heavy-tailed sources:
//! `f(s) = clamp(s, 0, cap) / cap`.

use std::collections::HashMap;

use super::{clamp_unit, ScoreCalibrator};
use crate::config::CalibrationSection;
use crate::weights::normalize;

pub const DEFAULT_SOFT_CAP: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct SoftClampCalibrator {
    default_cap: f64,
    caps: HashMap<String, f64>,
}

impl Default for SoftClampCalibrator {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_CAP)
    }
}

impl SoftClampCalibrator {
    pub fn new(default_cap: f64) -> Self {
        Self {
            default_cap: valid_cap(default_cap).unwrap_or(DEFAULT_SOFT_CAP),
            caps: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &CalibrationSection) -> Self {
        let mut out = Self::new(cfg.default_cap);
        for (source, &cap) in &cfg.caps {
            out = out.with_cap(source, cap);
        }
        out
    }

    /// Source-specific cap; invalid caps are ignored.
    pub fn with_cap(mut self, source_id: &str, cap: f64) -> Self {
        if let Some(c) = valid_cap(cap) {
            self.caps.insert(normalize(source_id), c);
        }
        self
    }

    pub fn cap_for(&self, source_id: &str) -> f64 {
        self.caps
            .get(&normalize(source_id))
            .copied()
            .unwrap_or(self.default_cap)
    }
}

fn valid_cap(cap: f64) -> Option<f64> {
    (cap.is_finite() && cap > 0.0).then_some(cap)
}

impl ScoreCalibrator for SoftClampCalibrator {
    fn normalize(&self, raw: f64, source_id: &str) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        let cap = self.cap_for(source_id);
        clamp_unit(raw.clamp(0.0, cap) / cap)
    }

    fn name(&self) -> &'static str {
        "soft_clamp"
    }
}
