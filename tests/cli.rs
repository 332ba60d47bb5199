//! End-to-end checks of the `kdex` binary: commands, JSON output and exit
//! codes.

mod fixtures;

use fixtures::{entry, run_kdex, TestStore};
use kdex::index::{IndexConfig, IndexWriter};
use kdex::utils::{get_index_path, AppConfig};
use std::fs;

fn store() -> TestStore {
    let store = TestStore::new();
    store.write(
        "knowledge/conventions.md",
        "# Conventions\n\nHouse rules.\n\n## Section A\nName modules after what they do.\n",
    );
    store.write(
        "knowledge/backlink-navigation.md",
        &entry("Backlink Navigation", "Follow references between entries.", None),
    );
    store.write(
        "work/plan.md",
        &entry("Plan", "Ship it. See also: [[knowledge:conventions#Section A]]", None),
    );
    store
}

fn root_arg(store: &TestStore) -> String {
    store.root().to_string_lossy().into_owned()
}

#[test]
fn test_index_then_search_json() {
    let store = store();
    let root = root_arg(&store);

    let out = run_kdex(&["index", &root], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert!(out.stdout.contains("3 added"));

    let out = run_kdex(&["search", &root, "backlinks", "--json"], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    let hits: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(hits[0]["path"], "knowledge/backlink-navigation.md");
    assert_eq!(hits[0]["source_type"], "knowledge");
}

#[test]
fn test_search_record_appends_events() {
    let store = store();
    let root = root_arg(&store);

    let out = run_kdex(&["search", &root, "modules", "--record", "--json"], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);

    let log = fs::read_to_string(store.root().join(".kdex/events.jsonl")).unwrap();
    let events: Vec<serde_json::Value> = log
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["path"], "knowledge/conventions.md");
    assert_eq!(events[0]["heading"], "Section A");

    let out = run_kdex(&["analyze", "--root", &root, "usage", "--json", "--write"], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    let report: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(report["events"], 1);
    assert!(store.report_path("usage.json").exists());
}

#[test]
fn test_resolve_json_and_invalid_backlink() {
    let store = store();
    let root = root_arg(&store);

    let out = run_kdex(&["resolve", &root, "[[knowledge:conventions#Section A]]", "--json"], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    let resolved: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(resolved["status"], "found");
    assert_eq!(resolved["kind"], "exact");
    assert_eq!(resolved["content"], "## Section A\nName modules after what they do.");

    let out = run_kdex(&["resolve", &root, "[[knowledge:missing]]", "--json"], &store.root());
    assert_eq!(out.code, Some(0));
    let resolved: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(resolved["status"], "broken");

    let out = run_kdex(&["resolve", &root, "[[plan:nothing]]"], &store.root());
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.starts_with("error:"));
}

#[test]
fn test_unreadable_root_exits_nonzero() {
    let store = TestStore::new();
    let missing = store.root().join("does-not-exist");
    let out = run_kdex(&["search", &missing.to_string_lossy(), "anything"], &store.root());
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.contains("error:"));
    assert!(out.stdout.is_empty());
}

#[test]
fn test_analyze_finds_store_root_from_subdirectory() {
    let store = store();
    let sub = store.root().join("knowledge");

    let out = run_kdex(&["analyze", "concordance", "--json"], &sub);
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    let value: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(value["see_also"]["schema_version"], 1);
    assert!(store.report_path("concordance.json").exists());
    assert!(store.report_path("merge-candidates.json").exists());

    let out = run_kdex(&["analyze", "merge-candidates", "--json"], &sub);
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    let value: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(value["band"], "merge");
}

#[test]
fn test_staleness_writes_report() {
    let store = store();
    let root = root_arg(&store);

    let out = run_kdex(
        &["analyze", "--root", &root, "staleness", "--repo-root", &root, "--json"],
        &store.root(),
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    let report: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(report["summary"]["unavailable"], 3);
    assert!(store.report_path("staleness.json").exists());
}

#[test]
fn test_locked_index_exits_with_contention_code() {
    let store = store();
    let root = root_arg(&store);
    let mut config = AppConfig::default();
    config.index.lock_timeout_ms = 100;
    store.write_config(&config);

    let out = run_kdex(&["index", &root], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);

    let index_config = IndexConfig::default();
    let mut holder = IndexWriter::open(&get_index_path(&store.root(), &index_config), &index_config).unwrap();
    let txn = holder.begin().unwrap();

    let out = run_kdex(&["index", &root], &store.root());
    assert_eq!(out.code, Some(2), "stderr: {}", out.stderr);
    assert!(out.stderr.contains("locked"));

    drop(txn);
    let out = run_kdex(&["index", &root], &store.root());
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
}
