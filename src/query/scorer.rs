//! Scoring module for search results
//!
//! Okapi BM25 over heading sections:
//! - term frequency saturation (`k1`)
//! - inverse document frequency across all sections
//! - length normalization against the average section length (`b`)
//!
//! plus a multiplicative bonus when query terms appear in the section heading.

use crate::error::IndexError;
use serde::{Deserialize, Serialize};

/// Configurable weights for scoring and snippet generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Term frequency saturation
    pub k1: f64,
    /// Length normalization strength (0 = none, 1 = full)
    pub b: f64,
    /// Score multiplier per unit of heading coverage
    pub heading_boost: f64,
    /// Snippet window width in words
    pub snippet_tokens: usize,
    /// Hard cap on snippet length in characters
    pub snippet_chars: usize,
    pub default_limit: usize,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            heading_boost: 0.5,
            snippet_tokens: 24,
            snippet_chars: 200,
            default_limit: 10,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), IndexError> {
        let bad = |msg: &str| Err(IndexError::InvalidConfig(format!("search.{}", msg)));
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return bad("k1 must be a non-negative number");
        }
        if !(0.0..=1.0).contains(&self.b) {
            return bad("b must be within [0, 1]");
        }
        if !self.heading_boost.is_finite() || self.heading_boost < 0.0 {
            return bad("heading_boost must be non-negative");
        }
        if self.snippet_tokens == 0 {
            return bad("snippet_tokens must be positive");
        }
        if self.snippet_chars < 16 {
            return bad("snippet_chars must be at least 16");
        }
        if self.default_limit == 0 {
            return bad("default_limit must be positive");
        }
        Ok(())
    }
}

/// Corpus-wide statistics BM25 needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusStats {
    pub section_count: u64,
    pub avg_length: f64,
}

/// Scorer calculates relevance scores for search results
pub struct Scorer {
    weights: ScoringWeights,
    stats: CorpusStats,
}

impl Scorer {
    pub fn new(weights: ScoringWeights, stats: CorpusStats) -> Self {
        Self { weights, stats }
    }

    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`; always positive
    pub fn idf(&self, doc_freq: u64) -> f64 {
        let n = self.stats.section_count as f64;
        let df = doc_freq as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 contribution of one term in one section
    pub fn term_score(&self, tf: u32, length: u32, idf: f64) -> f64 {
        if tf == 0 {
            return 0.0;
        }
        let tf = tf as f64;
        let k1 = self.weights.k1;
        let b = self.weights.b;
        let norm = if self.stats.avg_length > 0.0 {
            1.0 - b + b * (length as f64 / self.stats.avg_length)
        } else {
            1.0
        };
        idf * tf * (k1 + 1.0) / (tf + k1 * norm)
    }

    /// Multiplier for a section whose heading contains `coverage` (0..=1)
    /// of the distinct query terms
    pub fn heading_multiplier(&self, coverage: f64) -> f64 {
        1.0 + self.weights.heading_boost * coverage.clamp(0.0, 1.0)
    }
}
