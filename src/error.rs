//! Error types for the few fallible operations of the crate.
//!
//! The ranking path itself never surfaces these to callers; they are
//! converted to neutral defaults or fallbacks at the wrapper boundaries.

/// Isotonic fitting input problems.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("scores and targets differ in length: {scores} vs {targets}")]
    LengthMismatch { scores: usize, targets: usize },

    #[error("no finite (score, target) pairs to fit")]
    NoData,

    #[error("knots must be non-empty, finite, strictly increasing in x and non-decreasing in y")]
    InvalidKnots,
}

/// Readiness statistics could not be read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadinessError {
    #[error("readiness statistics unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Outcome of a failed single-flight execution. `Clone` so every waiter
/// attached to the same key receives the identical failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlightError {
    #[error("task for key {key} failed: {reason}")]
    Failed { key: String, reason: String },

    #[error("task for key {key} panicked")]
    Panicked { key: String },

    #[error("waited {waited_ms} ms for key {key} without a result")]
    Timeout { key: String, waited_ms: u64 },
}

/// Rerank-stage failure that the guard converts to the fallback list.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RerankError {
    #[error("rerank budget exhausted after {scored} of {total} candidates")]
    BudgetExhausted { scored: usize, total: usize },
}
