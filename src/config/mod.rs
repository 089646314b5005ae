// src/config/mod.rs
//! Fusion configuration loaded from TOML with environment overrides.
//!
//! Shape (all sections optional):
//! ```toml
//! [fusion]
//! strategy = "hybrid"   # "rrf" | "wpm" | "hybrid"
//! rrf_k = 60
//! window_size = 50
//! alpha = 0.6
//! wpm_p = 0.3
//!
//! [weights]
//! default_weight = 1.0
//! weights = { web = 1.0, vector = 0.5 }
//!
//! [readiness]
//! ready_seen_threshold = 200
//!
//! [guard]
//! max_concurrency = 2
//! ```

pub mod reload;

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::{info, warn};

use crate::fusion::FusionStrategy;
use crate::types::{DEFAULT_RRF_K, DEFAULT_WINDOW_SIZE};
use crate::weights::SourceWeights;

pub use reload::HotReloadConfig;

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/fusion.toml";

pub const ENV_CONFIG_PATH: &str = "RANKFUSE_CONFIG_PATH";
pub const ENV_RRF_K: &str = "RANKFUSE_RRF_K";
pub const ENV_WINDOW_SIZE: &str = "RANKFUSE_WINDOW_SIZE";
pub const ENV_ALPHA: &str = "RANKFUSE_ALPHA";
pub const ENV_STRATEGY: &str = "RANKFUSE_STRATEGY";
pub const ENV_READY_SEEN: &str = "RANKFUSE_READY_SEEN";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub fusion: FusionSection,
    pub weights: SourceWeights,
    pub readiness: ReadinessSection,
    pub delta: DeltaSection,
    pub calibration: CalibrationSection,
    pub guard: GuardSection,
    pub single_flight: SingleFlightSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FusionSection {
    pub strategy: FusionStrategy,
    pub rrf_k: u32,
    pub window_size: usize,
    /// Hybrid blend: `alpha * wpm + (1 - alpha) * rrf_norm`.
    pub alpha: f64,
    /// Power-mean exponent.
    pub wpm_p: f64,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Hybrid,
            rrf_k: DEFAULT_RRF_K,
            window_size: DEFAULT_WINDOW_SIZE,
            alpha: 0.6,
            wpm_p: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReadinessSection {
    /// Source type boosted once the statistics are ready (and capped before).
    pub boost_source: String,
    pub boost: f64,
    pub damp_source: String,
    pub damp: f64,
    /// Upper bound for the boosted source's weight while not ready.
    pub unready_cap: f64,
    pub ready_seen_threshold: i64,
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            boost_source: "vector".to_string(),
            boost: 1.15,
            damp_source: "web".to_string(),
            damp: 1.00,
            unready_cap: 0.25,
            ready_seen_threshold: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeltaSection {
    pub enabled: bool,
    pub lambda_per_day: f64,
    /// Normalized-Levenshtein similarity at which a later candidate counts as a duplicate.
    pub duplicate_similarity: f64,
}

impl Default for DeltaSection {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda_per_day: 0.03,
            duplicate_similarity: 0.90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    pub default_cap: f64,
    /// Per-source soft-clamp caps.
    pub caps: HashMap<String, f64>,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            default_cap: 1.5,
            caps: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    pub max_concurrency: usize,
    pub acquire_timeout_ms: u64,
    pub min_required_ms: u64,
    /// Budget that must remain before each scored pair inside a rerank.
    pub min_per_item_ms: u64,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            acquire_timeout_ms: 50,
            min_required_ms: 120,
            min_per_item_ms: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SingleFlightSection {
    /// How long a caller waits for a shared result.
    pub timeout_ms: u64,
    pub max_workers: usize,
    /// Hard limit on one execution; never below `timeout_ms`.
    pub exec_timeout_ms: u64,
}

impl Default for SingleFlightSection {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            max_workers: 8,
            exec_timeout_ms: 20_000,
        }
    }
}

impl FusionConfig {
    /// Parse and sanitize a TOML file. Does not apply env overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading fusion config {}", path.display()))?;
        Self::from_toml_str(&data)
            .with_context(|| format!("parsing fusion config {}", path.display()))
    }

    pub fn from_toml_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: FusionConfig = toml::from_str(data)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Resolve the config path from `RANKFUSE_CONFIG_PATH` (or the default),
    /// load it, then apply env overrides. Never fails: a missing or broken
    /// file yields defaults.
    pub fn from_env() -> Self {
        let path = config_path_from_env();
        let mut cfg = if path.exists() {
            match Self::load_from_file(&path) {
                Ok(c) => {
                    info!(target: "rankfuse::config", path = %path.display(), "fusion config loaded");
                    c
                }
                Err(e) => {
                    warn!(target: "rankfuse::config", error = ?e, "fusion config invalid; using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg
    }

    /// Apply `RANKFUSE_*` overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(k) = parse_env::<u32>(ENV_RRF_K) {
            self.fusion.rrf_k = k;
        }
        if let Some(w) = parse_env::<usize>(ENV_WINDOW_SIZE) {
            self.fusion.window_size = w;
        }
        if let Some(a) = parse_env::<f64>(ENV_ALPHA) {
            self.fusion.alpha = a;
        }
        if let Some(s) = parse_env::<FusionStrategy>(ENV_STRATEGY) {
            self.fusion.strategy = s;
        }
        if let Some(n) = parse_env::<i64>(ENV_READY_SEEN) {
            self.readiness.ready_seen_threshold = n;
        }
        self.sanitize();
    }

    /// Replace out-of-range or non-finite values with defaults.
    pub fn sanitize(&mut self) {
        let d = FusionSection::default();
        let f = &mut self.fusion;
        f.rrf_k = f.rrf_k.max(1);
        f.window_size = f.window_size.max(1);
        f.alpha = if f.alpha.is_finite() {
            f.alpha.clamp(0.0, 1.0)
        } else {
            d.alpha
        };
        if !f.wpm_p.is_finite() {
            f.wpm_p = d.wpm_p;
        }

        let rd = ReadinessSection::default();
        let r = &mut self.readiness;
        if !(r.boost.is_finite() && r.boost >= 0.0) {
            r.boost = rd.boost;
        }
        if !(r.damp.is_finite() && r.damp >= 0.0) {
            r.damp = rd.damp;
        }
        r.unready_cap = if r.unready_cap.is_finite() {
            r.unready_cap.clamp(0.0, 1.0)
        } else {
            rd.unready_cap
        };
        r.ready_seen_threshold = r.ready_seen_threshold.max(0);

        let dd = DeltaSection::default();
        let dl = &mut self.delta;
        if !(dl.lambda_per_day.is_finite() && dl.lambda_per_day >= 0.0) {
            dl.lambda_per_day = dd.lambda_per_day;
        }
        if !(0.0..=1.0).contains(&dl.duplicate_similarity) {
            dl.duplicate_similarity = dd.duplicate_similarity;
        }

        let c = &mut self.calibration;
        if !(c.default_cap.is_finite() && c.default_cap > 0.0) {
            c.default_cap = CalibrationSection::default().default_cap;
        }
        c.caps.retain(|_, cap| cap.is_finite() && *cap > 0.0);

        self.guard.max_concurrency = self.guard.max_concurrency.max(1);
        let sf = &mut self.single_flight;
        sf.max_workers = sf.max_workers.max(1);
        sf.exec_timeout_ms = sf.exec_timeout_ms.max(sf.timeout_ms);
    }
}

pub fn config_path_from_env() -> PathBuf {
    env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}
