// src/fusion/mod.rs
//! Multi-source fusion: weighted RRF, weighted power mean, and their blend.
//!
//! Candidates are collected in first-seen order (bundle order, then rank
//! order) into a vector indexed through a `HashMap`; the final stable sort
//! therefore breaks score ties by first appearance and never by map order.

pub mod hybrid;
pub mod rrf;
pub mod wpm;

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::calibrate::{ScoreCalibrator, SoftClampCalibrator};
use crate::config::FusionSection;
use crate::readiness::{GateDecision, ReadinessGate};
use crate::types::{finite_or_zero, sort_desc_stable, RankedDoc, RankingParams, SourceBundle};

pub use hybrid::blend;
pub use rrf::{rrf_contribution, rrf_normalized};
pub use wpm::{weighted_power_mean, WPM_EPSILON};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    Rrf,
    Wpm,
    #[default]
    Hybrid,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Rrf => "rrf",
            FusionStrategy::Wpm => "wpm",
            FusionStrategy::Hybrid => "hybrid",
        }
    }

    /// Whether raw scores need calibrating for this strategy.
    fn uses_scores(&self) -> bool {
        !matches!(self, FusionStrategy::Rrf)
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fusion strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for FusionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rrf" => Ok(FusionStrategy::Rrf),
            "wpm" => Ok(FusionStrategy::Wpm),
            "hybrid" => Ok(FusionStrategy::Hybrid),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Accumulated evidence for one candidate id.
struct Candidate {
    id: String,
    rrf: f64,
    /// `(calibrated score, effective weight)` per source that returned it.
    terms: Vec<(f64, f64)>,
}

/// Fuses ranked lists from several retrieval sources into one ranking.
///
/// Shared across requests; per-request inputs come in through
/// [`RankingParams`].
#[derive(Clone)]
pub struct Fuser {
    calibrator: Arc<dyn ScoreCalibrator>,
    gate: Option<ReadinessGate>,
    strategy: FusionStrategy,
    alpha: f64,
    wpm_p: f64,
}

impl fmt::Debug for Fuser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fuser")
            .field("calibrator", &self.calibrator.name())
            .field("gate", &self.gate)
            .field("strategy", &self.strategy)
            .field("alpha", &self.alpha)
            .field("wpm_p", &self.wpm_p)
            .finish()
    }
}

impl Fuser {
    pub fn new(calibrator: Arc<dyn ScoreCalibrator>, strategy: FusionStrategy) -> Self {
        let d = FusionSection::default();
        Self {
            calibrator,
            gate: None,
            strategy,
            alpha: d.alpha,
            wpm_p: d.wpm_p,
        }
    }

    /// Pure weighted RRF with base weights only.
    pub fn rrf() -> Self {
        Self::new(Arc::new(SoftClampCalibrator::default()), FusionStrategy::Rrf)
    }

    pub fn from_config(calibrator: Arc<dyn ScoreCalibrator>, cfg: &FusionSection) -> Self {
        Self::new(calibrator, cfg.strategy)
            .with_alpha(cfg.alpha)
            .with_p(cfg.wpm_p)
    }

    /// Route every source weight through the readiness gate.
    pub fn with_gate(mut self, gate: ReadinessGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            FusionSection::default().alpha
        };
        self
    }

    pub fn with_p(mut self, p: f64) -> Self {
        self.wpm_p = if p.is_finite() {
            p
        } else {
            FusionSection::default().wpm_p
        };
        self
    }

    pub fn strategy(&self) -> FusionStrategy {
        self.strategy
    }

    /// Fused ranking truncated to `params.window_size`.
    pub fn fuse(&self, bundles: &[SourceBundle], params: &RankingParams) -> Vec<RankedDoc> {
        let mut out = self.fuse_all(bundles, params);
        out.truncate(params.window_size);
        out
    }

    /// Fused ranking of every candidate, sorted but not truncated.
    pub fn fuse_all(&self, bundles: &[SourceBundle], params: &RankingParams) -> Vec<RankedDoc> {
        if bundles.iter().all(|b| b.docs.is_empty()) {
            return Vec::new();
        }

        let decision = self.gate.as_ref().map(ReadinessGate::evaluate);
        let (candidates, total_weight) = self.collect(bundles, params, decision.as_ref());

        let k = params.rrf_k;
        let mut out: Vec<RankedDoc> = candidates
            .into_iter()
            .map(|c| {
                let score = match self.strategy {
                    FusionStrategy::Rrf => c.rrf,
                    FusionStrategy::Wpm => weighted_power_mean(&c.terms, self.wpm_p),
                    FusionStrategy::Hybrid => blend(
                        weighted_power_mean(&c.terms, self.wpm_p),
                        rrf_normalized(c.rrf, k, total_weight),
                        self.alpha,
                    ),
                };
                RankedDoc::new(c.id, finite_or_zero(score))
            })
            .collect();
        sort_desc_stable(&mut out);

        debug!(
            target: "rankfuse::fusion",
            strategy = %self.strategy,
            bundles = bundles.len(),
            candidates = out.len(),
            ready = decision.as_ref().map(|d| d.ready),
            "fused"
        );
        out
    }

    fn collect(
        &self,
        bundles: &[SourceBundle],
        params: &RankingParams,
        decision: Option<&GateDecision>,
    ) -> (Vec<Candidate>, f64) {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut total_weight = 0.0;
        let k = params.rrf_k;
        let calibrate = self.strategy.uses_scores();

        for bundle in bundles.iter().filter(|b| !b.docs.is_empty()) {
            let canonical = params.canonical(&bundle.source_type);
            let base = params.weight_of(&bundle.source_type);
            let weight = match decision {
                Some(d) => d.adjust(&canonical, base),
                None => base,
            };
            total_weight += weight;

            let mut seen: HashSet<&str> = HashSet::with_capacity(bundle.docs.len());
            for (pos, doc) in bundle.docs.iter().enumerate() {
                if !seen.insert(doc.id.as_str()) {
                    continue;
                }
                let contribution = rrf_contribution(weight, k, pos + 1);
                let calibrated = match doc.raw_score {
                    Some(raw) if calibrate => self.calibrator.normalize(raw, &canonical),
                    _ => 0.0,
                };

                let slot = match index.get(&doc.id) {
                    Some(&i) => i,
                    None => {
                        index.insert(doc.id.clone(), candidates.len());
                        candidates.push(Candidate {
                            id: doc.id.clone(),
                            rrf: 0.0,
                            terms: Vec::new(),
                        });
                        candidates.len() - 1
                    }
                };
                let c = &mut candidates[slot];
                c.rrf += contribution;
                c.terms.push((calibrated, weight));
            }
        }
        (candidates, total_weight)
    }
}
