// src/calibrate/mod.rs
//! Score calibration: map source-native scores onto a common `[0,1]` scale.
//!
//! Three interchangeable strategies:
//! - [`MinMaxCalibrator`]: online running bounds per source, no decay.
//! - [`IsotonicCalibrator`]: evaluates PAV-fitted step functions installed by
//!   an offline trainer; sources without a model use a soft clamp.
//! - [`SoftClampCalibrator`]: stateless `clamp(s, 0, cap) / cap`.
//!
//! Every implementation returns a value in `[0,1]` for every input, including
//! NaN and ±inf (which are treated as `0.0`).

pub mod isotonic;
pub mod minmax;
pub mod soft_clamp;

pub use isotonic::{IsotonicCalibrator, IsotonicModel};
pub use minmax::{MinMaxCalibrator, COLD_START_SCORE};
pub use soft_clamp::{SoftClampCalibrator, DEFAULT_SOFT_CAP};

/// Calibrate a raw per-source score. Implementations are shared across
/// requests and must be safe under concurrent use.
pub trait ScoreCalibrator: Send + Sync {
    fn normalize(&self, raw: f64, source_id: &str) -> f64;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Final guard shared by all strategies.
pub(crate) fn clamp_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
