//! Batch analyses over an index snapshot.
//!
//! - [`concordance`] - Section similarity and the merge/see-also bands
//! - [`staleness`] - Drift scoring from commit history and broken links
//! - [`usage`] - Decayed retrieval scores and hot/warm/cold tiers
//!
//! Each analysis writes a JSON report through [`report`].

pub mod concordance;
pub mod history;
pub mod report;
pub mod staleness;
pub mod usage;

pub use concordance::{run_concordance, ConcordanceConfig, TfIdfModel};
pub use history::{CommitHistory, GitHistory, StaticHistory};
pub use staleness::{run_staleness, StalenessReport, StalenessWeights, Status};
pub use usage::{analyze_usage, read_events, RetrievalEvent, Tier, UsageConfig, UsageReport};
