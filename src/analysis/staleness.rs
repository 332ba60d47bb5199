//! Staleness: how far an entry has drifted from the code and links it
//! describes.
//!
//! Two signals feed the score. File drift counts commits touching the
//! entry's `related_files` since it was learned; backlink drift is the share
//! of its outbound references that no longer resolve. Confidence scales the
//! result so that weakly verified entries go stale sooner.

use crate::analysis::history::{CommitHistory, GitHistory};
use crate::analysis::report::REPORT_SCHEMA_VERSION;
use crate::backlink;
use crate::error::IndexError;
use crate::index::build;
use crate::index::reader::IndexReader;
use crate::index::types::{Confidence, Entry, SourceType};
use crate::utils::{find_repo_root, AppConfig};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Weights and thresholds of the drift formula
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessWeights {
    /// Commits at which the commit signal reaches ~63%
    pub commit_scale: f64,
    pub commit_weight: f64,
    pub link_weight: f64,
    pub high_multiplier: f64,
    pub medium_multiplier: f64,
    pub low_multiplier: f64,
    pub aging_threshold: f64,
    pub stale_threshold: f64,
}

impl Default for StalenessWeights {
    fn default() -> Self {
        Self {
            commit_scale: 5.0,
            commit_weight: 0.7,
            link_weight: 0.3,
            high_multiplier: 1.0,
            medium_multiplier: 1.25,
            low_multiplier: 1.5,
            aging_threshold: 0.3,
            stale_threshold: 0.6,
        }
    }
}

impl StalenessWeights {
    pub fn validate(&self) -> Result<(), IndexError> {
        let invalid = |msg: String| Err(IndexError::InvalidConfig(msg));

        if !(self.commit_scale > 0.0) {
            return invalid(format!("staleness.commit_scale must be positive, got {}", self.commit_scale));
        }
        if self.commit_weight < 0.0 || self.link_weight < 0.0 {
            return invalid("staleness weights must not be negative".to_string());
        }
        if !(1.0 <= self.high_multiplier
            && self.high_multiplier <= self.medium_multiplier
            && self.medium_multiplier <= self.low_multiplier)
        {
            return invalid(
                "staleness multipliers must satisfy 1 <= high <= medium <= low".to_string(),
            );
        }
        if !(0.0 < self.aging_threshold
            && self.aging_threshold < self.stale_threshold
            && self.stale_threshold <= 1.0)
        {
            return invalid(format!(
                "staleness thresholds must satisfy 0 < aging ({}) < stale ({}) <= 1",
                self.aging_threshold, self.stale_threshold
            ));
        }
        Ok(())
    }

    /// Unknown confidence is treated as medium
    pub fn multiplier(&self, confidence: Option<Confidence>) -> f64 {
        match confidence {
            Some(Confidence::High) => self.high_multiplier,
            Some(Confidence::Low) => self.low_multiplier,
            Some(Confidence::Medium) | None => self.medium_multiplier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Fresh,
    Aging,
    Stale,
    /// No file drift signal; excluded from automation
    Unavailable,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Fresh => "fresh",
            Status::Aging => "aging",
            Status::Stale => "stale",
            Status::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDrift {
    pub available: bool,
    pub commit_count: u32,
    /// Date commits are counted from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<NaiveDate>,
    /// Related files that do not exist under the repository root
    pub missing_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BacklinkDrift {
    pub broken: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StalenessRecord {
    pub path: String,
    pub title: String,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned: Option<NaiveDate>,
    pub related_files: Vec<String>,
    pub file_drift: FileDrift,
    pub backlink_drift: BacklinkDrift,
    /// Rendered `[[type:path#heading]]` of every broken reference
    pub broken_links: Vec<String>,
    pub drift_score: f64,
    pub status: Status,
}

/// Entries per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub fresh: usize,
    pub aging: usize,
    pub stale: usize,
    pub unavailable: usize,
}

/// `staleness.json`
#[derive(Debug, Clone, Serialize)]
pub struct StalenessReport {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<PathBuf>,
    pub summary: StatusSummary,
    /// Paths of stale entries, worst first
    pub fix_list: Vec<String>,
    pub entries: Vec<StalenessRecord>,
}

/// Combine the drift signals into a score in `[0, 1]`.
///
/// Non-decreasing in `commit_count` and in `broken` for fixed other inputs.
pub fn drift_score(
    weights: &StalenessWeights,
    commit_count: u32,
    links: BacklinkDrift,
    confidence: Option<Confidence>,
) -> f64 {
    let commit_signal = 1.0 - (-(commit_count as f64) / weights.commit_scale).exp();
    let link_signal = if links.total == 0 {
        0.0
    } else {
        links.broken.min(links.total) as f64 / links.total as f64
    };
    let base = weights.commit_weight * commit_signal + weights.link_weight * link_signal;
    (base * weights.multiplier(confidence)).clamp(0.0, 1.0)
}

pub fn classify(weights: &StalenessWeights, available: bool, score: f64) -> Status {
    if !available {
        Status::Unavailable
    } else if score >= weights.stale_threshold {
        Status::Stale
    } else if score >= weights.aging_threshold {
        Status::Aging
    } else {
        Status::Fresh
    }
}

/// `learned`, or the file's modification date when the entry has none
fn since_date(entry: &Entry) -> Option<NaiveDate> {
    entry.meta.learned.or_else(|| {
        DateTime::<Utc>::from_timestamp(
            entry.mtime_ns.div_euclid(1_000_000_000),
            entry.mtime_ns.rem_euclid(1_000_000_000) as u32,
        )
        .map(|t| t.date_naive())
    })
}

fn file_drift(entry: &Entry, history: Option<&dyn CommitHistory>, repo_root: Option<&Path>) -> FileDrift {
    let related = &entry.meta.related_files;
    let since = since_date(entry);
    let mut drift = FileDrift {
        available: false,
        commit_count: 0,
        since,
        missing_files: Vec::new(),
    };
    let Some(repo_root) = repo_root else {
        drift.missing_files = related.clone();
        return drift;
    };

    drift.missing_files = related
        .iter()
        .filter(|f| !repo_root.join(f).exists())
        .cloned()
        .collect();
    if related.is_empty() || drift.missing_files.len() == related.len() {
        return drift;
    }

    if let (Some(history), Some(since)) = (history, since) {
        if let Some(count) = history.commits_touching(related, since) {
            drift.available = true;
            drift.commit_count = count;
        }
    }
    drift
}

/// Score every entry of a snapshot.
///
/// Without a repository root every entry is unavailable; the score is still
/// computed from backlinks alone.
pub fn score_entries(
    reader: &IndexReader,
    history: Option<&dyn CommitHistory>,
    repo_root: Option<&Path>,
    weights: &StalenessWeights,
) -> Result<Vec<StalenessRecord>> {
    let mut records = Vec::new();

    for entry in reader.entries()? {
        let links = reader.backlinks_from(&entry.path)?;
        let mut broken_links = Vec::new();
        for link in &links {
            if backlink::is_broken(reader, link)? {
                broken_links.push(link.to_string());
            }
        }
        let backlink_drift = BacklinkDrift {
            broken: broken_links.len() as u32,
            total: links.len() as u32,
        };

        let file_drift = file_drift(&entry, history, repo_root);
        let score = drift_score(weights, file_drift.commit_count, backlink_drift, entry.meta.confidence);
        let status = classify(weights, file_drift.available, score);
        tracing::debug!(path = %entry.path, score, status = status.as_str(), "scored entry");

        records.push(StalenessRecord {
            path: entry.path,
            title: entry.title,
            source_type: entry.source_type,
            confidence: entry.meta.confidence,
            learned: entry.meta.learned,
            related_files: entry.meta.related_files,
            file_drift,
            backlink_drift,
            broken_links,
            drift_score: score,
            status,
        });
    }

    Ok(records)
}

/// Assemble the report: summary counts and the stale fix list
pub fn build_report(
    records: Vec<StalenessRecord>,
    generation: u64,
    repo_root: Option<PathBuf>,
) -> StalenessReport {
    let mut summary = StatusSummary::default();
    for record in &records {
        match record.status {
            Status::Fresh => summary.fresh += 1,
            Status::Aging => summary.aging += 1,
            Status::Stale => summary.stale += 1,
            Status::Unavailable => summary.unavailable += 1,
        }
    }

    let mut stale: Vec<&StalenessRecord> = records
        .iter()
        .filter(|r| r.status == Status::Stale)
        .collect();
    stale.sort_by(|a, b| {
        b.drift_score
            .total_cmp(&a.drift_score)
            .then_with(|| a.path.cmp(&b.path))
    });
    let fix_list = stale.into_iter().map(|r| r.path.clone()).collect();

    StalenessReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at: Utc::now(),
        generation,
        repo_root,
        summary,
        fix_list,
        entries: records,
    }
}

/// Repository root for commit queries: explicit, then recorded, then the
/// nearest `.git` ancestor of the store
pub fn resolve_repo_root(
    store_root: &Path,
    reader: &IndexReader,
    explicit: Option<&Path>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }
    if let Some(recorded) = reader.meta_value("repo_root")? {
        return Ok(Some(PathBuf::from(recorded)));
    }
    Ok(find_repo_root(store_root))
}

/// Refresh the index, then score every entry against git history
pub fn run_staleness(
    store_root: &Path,
    config: &AppConfig,
    repo_root: Option<&Path>,
) -> Result<StalenessReport> {
    // Deleted link targets must be gone from the index to count as broken
    match build::incremental_scan(store_root, &config.index) {
        Ok(scan) => tracing::debug!(changed = scan.changed(), "index refreshed before staleness"),
        Err(err)
            if err
                .downcast_ref::<IndexError>()
                .is_some_and(IndexError::is_contention) =>
        {
            tracing::warn!(error = %err, "index busy; scoring the last committed snapshot");
        }
        Err(err) => return Err(err),
    }

    let reader = IndexReader::open_or_build(store_root, config)?;
    let repo_root = resolve_repo_root(store_root, &reader, repo_root)?;
    let history = repo_root.as_deref().map(GitHistory::new);
    match &history {
        Some(git) => tracing::debug!(repo = %git.repo_root().display(), "querying commit history"),
        None => tracing::warn!("no repository root found; file drift unavailable for every entry"),
    }

    let records = score_entries(
        &reader,
        history.as_ref().map(|h| h as &dyn CommitHistory),
        repo_root.as_deref(),
        &config.staleness,
    )?;
    let report = build_report(records, reader.generation(), repo_root);
    tracing::info!(
        entries = report.entries.len(),
        stale = report.summary.stale,
        unavailable = report.summary.unavailable,
        "staleness analysis complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn links(broken: u32, total: u32) -> BacklinkDrift {
        BacklinkDrift { broken, total }
    }

    #[test]
    fn test_no_signal_is_fresh() {
        let w = StalenessWeights::default();
        let score = drift_score(&w, 0, links(0, 0), Some(Confidence::High));
        assert_eq!(score, 0.0);
        assert_eq!(classify(&w, true, score), Status::Fresh);
    }

    #[test]
    fn test_many_commits_low_confidence_is_stale() {
        let w = StalenessWeights::default();
        let score = drift_score(&w, 20, links(1, 2), Some(Confidence::Low));
        assert!(score >= w.stale_threshold);
        assert_eq!(classify(&w, true, score), Status::Stale);
    }

    #[test]
    fn test_low_confidence_ages_faster() {
        let w = StalenessWeights::default();
        let high = drift_score(&w, 3, links(0, 1), Some(Confidence::High));
        let low = drift_score(&w, 3, links(0, 1), Some(Confidence::Low));
        let unknown = drift_score(&w, 3, links(0, 1), None);
        let medium = drift_score(&w, 3, links(0, 1), Some(Confidence::Medium));
        assert!(low > high);
        assert_eq!(unknown, medium);
    }

    #[test]
    fn test_unavailable_wins_over_score() {
        let w = StalenessWeights::default();
        assert_eq!(classify(&w, false, 0.99), Status::Unavailable);
    }

    #[test]
    fn test_weights_validation() {
        assert!(StalenessWeights::default().validate().is_ok());
        let inverted = StalenessWeights {
            aging_threshold: 0.7,
            stale_threshold: 0.6,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
        let shrinking = StalenessWeights {
            low_multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_fix_list_only_stale_worst_first() {
        let record = |path: &str, score: f64, status: Status| StalenessRecord {
            path: path.to_string(),
            title: path.to_string(),
            source_type: SourceType::Knowledge,
            confidence: None,
            learned: None,
            related_files: vec![],
            file_drift: FileDrift {
                available: status != Status::Unavailable,
                commit_count: 0,
                since: None,
                missing_files: vec![],
            },
            backlink_drift: BacklinkDrift::default(),
            broken_links: vec![],
            drift_score: score,
            status,
        };
        let report = build_report(
            vec![
                record("a.md", 0.7, Status::Stale),
                record("b.md", 0.9, Status::Stale),
                record("c.md", 0.95, Status::Unavailable),
                record("d.md", 0.1, Status::Fresh),
            ],
            1,
            None,
        );
        assert_eq!(report.fix_list, vec!["b.md", "a.md"]);
        assert_eq!(report.summary.stale, 2);
        assert_eq!(report.summary.unavailable, 1);
        assert_eq!(report.summary.fresh, 1);
    }

    fn confidence() -> impl Strategy<Value = Option<Confidence>> {
        prop_oneof![
            Just(None),
            Just(Some(Confidence::High)),
            Just(Some(Confidence::Medium)),
            Just(Some(Confidence::Low)),
        ]
    }

    proptest! {
        #[test]
        fn prop_more_commits_never_lowers_score(
            commits in 0u32..500,
            extra in 0u32..500,
            broken in 0u32..10,
            total in 0u32..10,
            confidence in confidence(),
        ) {
            let w = StalenessWeights::default();
            let drift = links(broken.min(total), total);
            let before = drift_score(&w, commits, drift, confidence);
            let after = drift_score(&w, commits + extra, drift, confidence);
            prop_assert!(after >= before);
            prop_assert!((0.0..=1.0).contains(&after));
        }

        #[test]
        fn prop_more_broken_links_never_lowers_score(
            commits in 0u32..50,
            broken in 0u32..10,
            total in 1u32..10,
            confidence in confidence(),
        ) {
            let w = StalenessWeights::default();
            let broken = broken.min(total - 1);
            let before = drift_score(&w, commits, links(broken, total), confidence);
            let after = drift_score(&w, commits, links(broken + 1, total), confidence);
            prop_assert!(after >= before);
        }
    }
}
