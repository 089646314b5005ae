// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod calibrate;
pub mod config;
pub mod delta;
pub mod error;
pub mod fusion;
pub mod guard;
pub mod metrics;
pub mod pipeline;
pub mod readiness;
pub mod rerank;
pub mod single_flight;
pub mod telemetry;
pub mod types;
pub mod weights;

// ---- Re-exports for stable public API ----
pub use crate::calibrate::{
    IsotonicCalibrator, IsotonicModel, MinMaxCalibrator, ScoreCalibrator, SoftClampCalibrator,
};
pub use crate::config::{FusionConfig, HotReloadConfig};
pub use crate::delta::DeltaProjection;
pub use crate::error::{CalibrationError, FlightError, ReadinessError, RerankError};
pub use crate::fusion::{Fuser, FusionStrategy};
pub use crate::guard::ConcurrencyGuard;
pub use crate::pipeline::RankingPipeline;
pub use crate::readiness::{ReadinessGate, ReadinessSource, ReadinessState};
pub use crate::rerank::{CrossEncoderReranker, GuardedReranker, PairScorer, Reranker};
pub use crate::single_flight::SingleFlight;
pub use crate::types::{
    Budget, DocMeta, MetaMap, RankedDoc, RankingParams, RerankParams, SourceBundle, SourceDoc,
};
pub use crate::weights::SourceWeights;
