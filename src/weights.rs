//! # Source Weights
//!
//! Configurable mapping from retrieval source types (e.g. "web", "vector",
//! "kg") to non-negative fusion weights.
//!
//! - Case-insensitive lookup with normalization of punctuation, dashes, etc.
//! - Aliases map alternative names (`bm25`, `knn`, `graph`) to canonical types.
//! - Fallback order: aliases → exact match → default.
//! - Includes a built-in `default_seed()` with the common retrieval sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_SOURCE_WEIGHT: f64 = 1.0;

/// Weights keyed by normalized source type. Keys are normalized on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SourceWeightsFile")]
pub struct SourceWeights {
    /// Weight for types with no explicit entry.
    pub default_weight: f64,
    pub weights: HashMap<String, f64>,
    pub aliases: HashMap<String, String>,
}

/// On-disk shape, before key normalization.
#[derive(Debug, Clone, Deserialize)]
struct SourceWeightsFile {
    #[serde(default = "default_default_weight")]
    default_weight: f64,
    #[serde(default)]
    weights: HashMap<String, f64>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

fn default_default_weight() -> f64 {
    DEFAULT_SOURCE_WEIGHT
}

impl From<SourceWeightsFile> for SourceWeights {
    fn from(raw: SourceWeightsFile) -> Self {
        let mut seeded = Self::default_seed();
        seeded.default_weight = sanitize_weight(raw.default_weight);
        for (k, v) in raw.weights {
            seeded.weights.insert(normalize(&k), sanitize_weight(v));
        }
        for (a, c) in raw.aliases {
            seeded.aliases.insert(normalize(&a), normalize(&c));
        }
        seeded
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl SourceWeights {
    /// Explicit `(type, weight)` pairs on top of the default seed.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut out = Self::default_seed();
        for (k, v) in pairs {
            out.weights.insert(normalize(k), sanitize_weight(v));
        }
        out
    }

    pub fn set(&mut self, source_type: &str, weight: f64) {
        self.weights
            .insert(normalize(source_type), sanitize_weight(weight));
    }

    /// Get the weight for a source type.
    ///
    /// Steps:
    /// 1. Alias lookup (normalized) → canonical → weight.
    /// 2. Exact weight match.
    /// 3. Default weight.
    pub fn weight_for(&self, source_type: &str) -> f64 {
        let s = normalize(source_type);

        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.weights.get(canon) {
                return sanitize_weight(w);
            }
        }

        if let Some(&w) = self.weights.get(&s) {
            return sanitize_weight(w);
        }

        sanitize_weight(self.default_weight)
    }

    /// Canonical name for a source type (alias-resolved, normalized).
    pub fn canonical(&self, source_type: &str) -> String {
        let s = normalize(source_type);
        self.aliases.get(&s).cloned().unwrap_or(s)
    }

    /// Built-in seed: every canonical type weighs 1.0, common aliases resolved.
    pub(crate) fn default_seed() -> Self {
        let mut weights = HashMap::new();
        let mut aliases = HashMap::new();

        for k in ["web", "vector", "kg"] {
            weights.insert(k.to_string(), DEFAULT_SOURCE_WEIGHT);
        }

        for (a, c) in [
            ("lexical", "web"),
            ("bm25", "web"),
            ("fts", "web"),
            ("search", "web"),
            ("knn", "vector"),
            ("ann", "vector"),
            ("embedding", "vector"),
            ("dense", "vector"),
            ("graph", "kg"),
            ("knowledge graph", "kg"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_weight: DEFAULT_SOURCE_WEIGHT,
            weights,
            aliases,
        }
    }
}

/// Normalize a source name: lowercase, separators to spaces, collapse spaces.
pub(crate) fn normalize(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    for ch in ['—', '–', '-', '_', '/', '\\', '.', ','] {
        out = out.replace(ch, " ");
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sanitize_weight(w: f64) -> f64 {
    if w.is_finite() && w > 0.0 {
        w
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_default() {
        let mut c = SourceWeights::default_seed();
        c.set("vector", 0.5);
        assert!((c.weight_for("vector") - 0.5).abs() < 1e-12);
        assert!((c.weight_for("TotallyUnknown") - c.default_weight).abs() < 1e-12);
    }

    #[test]
    fn alias_resolves_to_canonical_weight() {
        let c = SourceWeights::from_pairs([("vector", 0.4), ("kg", 0.7)]);
        assert!((c.weight_for("KNN") - 0.4).abs() < 1e-12);
        assert!((c.weight_for("Knowledge-Graph") - 0.7).abs() < 1e-12);
        assert_eq!(c.canonical("BM25"), "web");
    }

    #[test]
    fn negative_and_nan_weights_become_zero() {
        let c = SourceWeights::from_pairs([("web", -2.0), ("vector", f64::NAN)]);
        assert_eq!(c.weight_for("web"), 0.0);
        assert_eq!(c.weight_for("vector"), 0.0);
    }

    #[test]
    fn file_keys_are_normalized() {
        let c: SourceWeights = toml::from_str(
            r#"
            default_weight = 0.8
            [weights]
            "Web" = 1.0
            "Vector_Store" = 0.5
            [aliases]
            "Qdrant" = "vector store"
            "#,
        )
        .unwrap();
        assert!((c.weight_for("vector store") - 0.5).abs() < 1e-12);
        assert!((c.weight_for("qdrant") - 0.5).abs() < 1e-12);
        assert!((c.weight_for("other") - 0.8).abs() < 1e-12);
    }
}
