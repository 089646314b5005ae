// src/pipeline.rs
//! Request-level wiring: calibrate → fuse → delta → window → optional rerank.
//!
//! One `RankingPipeline` per process; every request brings its own
//! bundles, metadata, and budget.

use std::sync::Arc;
use tracing::debug;

use crate::calibrate::ScoreCalibrator;
use crate::config::FusionConfig;
use crate::delta::DeltaProjection;
use crate::fusion::Fuser;
use crate::readiness::{ReadinessGate, ReadinessSource};
use crate::rerank::{limit_stable, GuardedReranker, Reranker};
use crate::types::{MetaMap, RankedDoc, RankingParams, RerankParams, SourceBundle};

#[derive(Debug)]
pub struct RankingPipeline {
    config: FusionConfig,
    fuser: Fuser,
    delta: DeltaProjection,
    reranker: Option<GuardedReranker>,
}

impl RankingPipeline {
    /// Build from config. `readiness = None` keeps the gate permanently
    /// "not ready".
    pub fn new(
        config: FusionConfig,
        calibrator: Arc<dyn ScoreCalibrator>,
        readiness: Option<Arc<dyn ReadinessSource>>,
    ) -> Self {
        let gate = ReadinessGate::new(readiness, config.readiness.clone());
        let fuser = Fuser::from_config(calibrator, &config.fusion).with_gate(gate);
        let delta = DeltaProjection::from_config(&config.delta);
        Self {
            config,
            fuser,
            delta,
            reranker: None,
        }
    }

    /// Attach the expensive stage, guarded and de-duplicated per config.
    pub fn with_reranker(mut self, inner: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(GuardedReranker::from_config(inner, &self.config));
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Per-request params derived from config.
    pub fn params(&self) -> RankingParams {
        RankingParams::from_config(&self.config)
    }

    /// Fused, delta-adjusted ranking truncated to `params.window_size`.
    pub fn fuse(
        &self,
        bundles: &[SourceBundle],
        params: &RankingParams,
        meta: &MetaMap,
    ) -> Vec<RankedDoc> {
        let fused = self.fuser.fuse_all(bundles, params);
        let mut out = self.delta.apply(fused, meta);
        out.truncate(params.window_size);
        out
    }

    /// Rerank the fused window; without a reranker this is the stable trim.
    pub async fn rerank(&self, top_n: &[RankedDoc], params: &RerankParams) -> Vec<RankedDoc> {
        match &self.reranker {
            Some(r) => r.rerank(top_n, params).await,
            None => limit_stable(top_n, params.target_count),
        }
    }

    /// `fuse` followed by `rerank`.
    pub async fn rank(
        &self,
        bundles: &[SourceBundle],
        meta: &MetaMap,
        rerank: &RerankParams,
    ) -> Vec<RankedDoc> {
        let params = self.params();
        let window = self.fuse(bundles, &params, meta);
        debug!(
            target: "rankfuse::fusion",
            window = window.len(),
            target_count = rerank.target_count,
            remaining_ms = rerank.budget.remaining_ms(),
            "fused window ready"
        );
        self.rerank(&window, rerank).await
    }
}
