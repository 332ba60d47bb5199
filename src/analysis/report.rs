//! Report files under `<root>/.kdex/reports/`.
//!
//! Every report is a standalone JSON document carrying `schema_version` and
//! `generated_at`. Files are written to a temporary sibling and renamed into
//! place, so a reader never sees a half-written report.

use crate::index::types::SectionKey;
use crate::utils::get_reports_dir;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Bumped when a report's field layout changes incompatibly
pub const REPORT_SCHEMA_VERSION: u32 = 1;

pub const STALENESS_REPORT: &str = "staleness.json";
pub const USAGE_REPORT: &str = "usage.json";
pub const CONCORDANCE_REPORT: &str = "concordance.json";
pub const MERGE_CANDIDATES_REPORT: &str = "merge-candidates.json";

/// One similar pair as reported (`a < b`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairRecord {
    pub a: SectionKey,
    pub b: SectionKey,
    pub score: f64,
}

/// Write `value` as pretty JSON to `dir/name` atomically. Each call stages
/// into its own temporary file, so concurrent runs never share one.
pub fn write_json_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let target = dir.join(name);

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize report")?;
    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to stage report in {}", dir.display()))?;
    staged.write_all(&json)?;
    staged.write_all(b"\n")?;
    staged.as_file().sync_all()?;
    staged
        .persist(&target)
        .with_context(|| format!("Failed to move report into {}", target.display()))?;

    tracing::info!(path = %target.display(), "report written");
    Ok(target)
}

/// Write a report into the store's report directory
pub fn write_report<T: Serialize>(store_root: &Path, name: &str, value: &T) -> Result<PathBuf> {
    let dir = get_reports_dir(store_root)?;
    write_json_atomic(&dir, name, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        schema_version: u32,
        items: Vec<u32>,
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let first = Sample {
            schema_version: REPORT_SCHEMA_VERSION,
            items: vec![1],
        };
        let second = Sample {
            schema_version: REPORT_SCHEMA_VERSION,
            items: vec![1, 2],
        };

        write_json_atomic(dir.path(), "r.json", &first).unwrap();
        let path = write_json_atomic(dir.path(), "r.json", &second).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["items"], serde_json::json!([1, 2]));
        assert_eq!(parsed["schema_version"], 1);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_concurrent_writers_all_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        std::thread::scope(|scope| {
            for worker in 0..8u32 {
                scope.spawn(move || {
                    for round in 0..25u32 {
                        let sample = Sample {
                            schema_version: REPORT_SCHEMA_VERSION,
                            items: vec![worker, round],
                        };
                        write_json_atomic(dir, STALENESS_REPORT, &sample).unwrap();
                    }
                });
            }
        });

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(STALENESS_REPORT)).unwrap()).unwrap();
        assert_eq!(parsed["items"].as_array().unwrap().len(), 2);
        let entries = fs::read_dir(dir).unwrap().count();
        assert_eq!(entries, 1, "only the published report remains");
    }

    #[test]
    fn test_reports_land_in_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(
            dir.path(),
            USAGE_REPORT,
            &Sample {
                schema_version: 1,
                items: vec![],
            },
        )
        .unwrap();
        assert!(path.ends_with(".kdex/reports/usage.json"));
    }
}
