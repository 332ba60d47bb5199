//! Ranked retrieval over the section index.
//!
//! - [`scorer`] - BM25 weights and per-term scoring
//! - [`executor`] - Query execution against an [`IndexReader`](crate::index::IndexReader) snapshot
//! - [`snippet`] - Hit-centered text windows
//! - [`topk`] - Bounded top-k selection

pub mod executor;
pub mod scorer;
pub mod snippet;
pub mod topk;

pub use executor::{SearchEngine, SearchHit, SearchOptions};
pub use scorer::{CorpusStats, Scorer, ScoringWeights};
pub use topk::{TopKEntry, TopKHeap};
