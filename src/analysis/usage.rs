//! Usage: which sections are actually being retrieved.
//!
//! Retrieval events are appended to a JSON-lines log. Each section gets a
//! decayed access score (`Σ 0.5^(age / half_life)`) and a tier relative to
//! the rest of the store.

use crate::analysis::report::REPORT_SCHEMA_VERSION;
use crate::error::IndexError;
use crate::index::reader::IndexReader;
use crate::index::types::{SectionKey, SectionRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub half_life_days: f64,
    pub hot_quantile: f64,
    pub warm_quantile: f64,
    /// Sessions that must be observed before unused entries are flagged
    pub min_sessions_for_cold: usize,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            half_life_days: 14.0,
            hot_quantile: 0.75,
            warm_quantile: 0.40,
            min_sessions_for_cold: 10,
        }
    }
}

impl UsageConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if !(self.half_life_days > 0.0) {
            return Err(IndexError::InvalidConfig(format!(
                "usage.half_life_days must be positive, got {}",
                self.half_life_days
            )));
        }
        if !(0.0 < self.warm_quantile && self.warm_quantile < self.hot_quantile && self.hot_quantile <= 1.0) {
            return Err(IndexError::InvalidConfig(format!(
                "usage quantiles must satisfy 0 < warm ({}) < hot ({}) <= 1",
                self.warm_quantile, self.hot_quantile
            )));
        }
        Ok(())
    }
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalEvent {
    pub ts: DateTime<Utc>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl RetrievalEvent {
    /// Session identity; events without one share a per-day anonymous session
    fn session_key(&self) -> String {
        match &self.session {
            Some(s) if !s.is_empty() => s.clone(),
            _ => format!("anon:{}", self.ts.date_naive()),
        }
    }
}

/// Events read from a log
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    pub events: Vec<RetrievalEvent>,
    /// Lines that were not valid events
    pub malformed: usize,
}

/// Read the event log. A missing file is an empty log.
pub fn read_events(path: &Path) -> Result<EventLog> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EventLog::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open event log {}", path.display()));
        }
    };

    let mut log = EventLog::default();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RetrievalEvent>(&line) {
            Ok(event) => log.events.push(event),
            Err(_) => log.malformed += 1,
        }
    }
    if log.malformed > 0 {
        tracing::warn!(path = %path.display(), malformed = log.malformed, "skipped malformed events");
    }
    Ok(log)
}

/// Append events as JSON lines
pub fn append_events(path: &Path, events: &[RetrievalEvent]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut buf = Vec::new();
    for event in events {
        serde_json::to_writer(&mut buf, event)?;
        buf.push(b'\n');
    }
    // One write per batch keeps concurrent appenders line-atomic
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    file.write_all(&buf)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionUsage {
    pub path: String,
    pub heading: String,
    pub events: usize,
    pub sessions: usize,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access: Option<DateTime<Utc>>,
    pub tier: Tier,
}

impl SectionUsage {
    pub fn key(&self) -> SectionKey {
        SectionKey::new(self.path.clone(), self.heading.clone())
    }
}

/// Sections per tier
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierBuckets {
    pub hot: Vec<SectionKey>,
    pub warm: Vec<SectionKey>,
    pub cold: Vec<SectionKey>,
}

/// `usage.json`
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub generation: u64,
    pub events: usize,
    pub malformed_events: usize,
    /// Events naming a path that is not in the index
    pub orphan_events: usize,
    pub sessions_observed: usize,
    pub hot_cutoff: f64,
    pub warm_cutoff: f64,
    pub buckets: TierBuckets,
    /// Entries never retrieved across enough sessions to judge
    pub prune_candidates: Vec<String>,
    pub sections: Vec<SectionUsage>,
}

#[derive(Default)]
struct Accumulator {
    events: usize,
    score: f64,
    sessions: FxHashSet<String>,
    last_access: Option<DateTime<Utc>>,
}

/// Nearest-rank quantile of an ascending slice
fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn decay(age_days: f64, half_life_days: f64) -> f64 {
    0.5f64.powf(age_days.max(0.0) / half_life_days)
}

/// Attribute events to sections and tier every section of the snapshot
pub fn analyze_usage(
    reader: &IndexReader,
    log: &EventLog,
    config: &UsageConfig,
    now: DateTime<Utc>,
) -> Result<UsageReport> {
    let sections = reader.sections()?;
    let mut by_path: BTreeMap<&str, Vec<&SectionRow>> = BTreeMap::new();
    for row in &sections {
        by_path.entry(row.key.path.as_str()).or_default().push(row);
    }

    let mut acc: FxHashMap<&SectionKey, Accumulator> = FxHashMap::default();
    let mut all_sessions: FxHashSet<String> = FxHashSet::default();
    let mut orphan_events = 0;

    for event in &log.events {
        let session = event.session_key();
        all_sessions.insert(session.clone());

        // Rows are ordered by ordinal, so the first is the entry's first section
        let Some(rows) = by_path.get(event.path.as_str()) else {
            orphan_events += 1;
            continue;
        };
        let target = event
            .heading
            .as_deref()
            .and_then(|h| rows.iter().find(|r| r.key.heading == h))
            .or_else(|| rows.first());
        let Some(target) = target else {
            orphan_events += 1;
            continue;
        };

        let age_days = (now - event.ts).num_milliseconds() as f64 / 86_400_000.0;
        let slot = acc.entry(&target.key).or_default();
        slot.events += 1;
        slot.score += decay(age_days, config.half_life_days);
        slot.sessions.insert(session);
        if slot.last_access.is_none_or(|t| t < event.ts) {
            slot.last_access = Some(event.ts);
        }
    }

    let mut positive: Vec<f64> = acc.values().map(|a| a.score).filter(|s| *s > 0.0).collect();
    positive.sort_by(|a, b| a.total_cmp(b));
    let hot_cutoff = nearest_rank(&positive, config.hot_quantile);
    let warm_cutoff = nearest_rank(&positive, config.warm_quantile);
    let sessions_observed = all_sessions.len();

    let mut usages = Vec::with_capacity(sections.len());
    let mut buckets = TierBuckets::default();
    for row in &sections {
        let slot = acc.remove(&row.key).unwrap_or_default();
        let everywhere = sessions_observed > 0 && slot.sessions.len() == sessions_observed;
        let tier = if slot.score <= 0.0 {
            Tier::Cold
        } else if everywhere || slot.score >= hot_cutoff {
            Tier::Hot
        } else if slot.score >= warm_cutoff {
            Tier::Warm
        } else {
            Tier::Cold
        };

        match tier {
            Tier::Hot => buckets.hot.push(row.key.clone()),
            Tier::Warm => buckets.warm.push(row.key.clone()),
            Tier::Cold => buckets.cold.push(row.key.clone()),
        }
        usages.push(SectionUsage {
            path: row.key.path.clone(),
            heading: row.key.heading.clone(),
            events: slot.events,
            sessions: slot.sessions.len(),
            score: slot.score,
            last_access: slot.last_access,
            tier,
        });
    }

    let prune_candidates = if sessions_observed >= config.min_sessions_for_cold {
        by_path
            .keys()
            .filter(|path| usages.iter().filter(|u| u.path == **path).all(|u| u.events == 0))
            .map(|path| path.to_string())
            .collect()
    } else {
        Vec::new()
    };

    tracing::info!(
        events = log.events.len(),
        sessions = sessions_observed,
        hot = buckets.hot.len(),
        cold = buckets.cold.len(),
        "usage analysis complete"
    );

    Ok(UsageReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at: now,
        generation: reader.generation(),
        events: log.events.len(),
        malformed_events: log.malformed,
        orphan_events,
        sessions_observed,
        hot_cutoff,
        warm_cutoff,
        buckets,
        prune_candidates,
        sections: usages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_rank() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(nearest_rank(&values, 0.75), 3.0);
        assert_eq!(nearest_rank(&values, 0.40), 2.0);
        assert_eq!(nearest_rank(&values, 1.0), 4.0);
        assert_eq!(nearest_rank(&[], 0.5), 0.0);
    }

    #[test]
    fn test_decay_halves_per_half_life() {
        assert_eq!(decay(0.0, 14.0), 1.0);
        assert!((decay(14.0, 14.0) - 0.5).abs() < 1e-12);
        assert!((decay(28.0, 14.0) - 0.25).abs() < 1e-12);
        // Events stamped in the future count as fresh
        assert_eq!(decay(-3.0, 14.0), 1.0);
    }

    #[test]
    fn test_event_log_round_trip_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let event = RetrievalEvent {
            ts: "2025-01-02T03:04:05Z".parse().unwrap(),
            path: "knowledge/a.md".to_string(),
            heading: Some("Setup".to_string()),
            session: Some("s1".to_string()),
            branch: None,
        };
        append_events(&path, std::slice::from_ref(&event)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        append_events(&path, std::slice::from_ref(&event)).unwrap();

        let log = read_events(&path).unwrap();
        assert_eq!(log.events, vec![event.clone(), event]);
        assert_eq!(log.malformed, 1);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = read_events(&dir.path().join("none.jsonl")).unwrap();
        assert!(log.events.is_empty());
    }

    #[test]
    fn test_anonymous_sessions_group_by_day() {
        let event = |ts: &str| RetrievalEvent {
            ts: ts.parse().unwrap(),
            path: "p".to_string(),
            heading: None,
            session: None,
            branch: None,
        };
        assert_eq!(
            event("2025-01-02T01:00:00Z").session_key(),
            event("2025-01-02T23:00:00Z").session_key()
        );
        assert_ne!(
            event("2025-01-02T01:00:00Z").session_key(),
            event("2025-01-03T01:00:00Z").session_key()
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(UsageConfig::default().validate().is_ok());
        let inverted = UsageConfig {
            warm_quantile: 0.9,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
