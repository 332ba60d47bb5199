//! Scanning, search and backlink resolution against real stores.

mod fixtures;

use fixtures::{entry, TestStore};
use kdex::backlink::{self, Backlink, ResolutionKind, Resolved};
use kdex::index::{SourceType, TypeFilter};
use kdex::query::{SearchEngine, SearchOptions};

fn sample_store() -> TestStore {
    let store = TestStore::new();
    store.write(
        "knowledge/conventions.md",
        "# Conventions\n\
         \n\
         House rules for the codebase.\n\
         \n\
         ## Section A\n\
         Name modules after what they do.\n\
         \n\
         ## Error Reporting\n\
         Wrap errors with context before returning them.\n\
         \n\
         <!-- learned: 2025-02-01 | confidence: high -->\n",
    );
    store.write(
        "knowledge/backlink-navigation.md",
        &entry(
            "Backlink Navigation",
            "Follow a backlink to jump between related entries.\n\
             Resolution falls back to the whole document when a heading is gone.",
            Some("learned: 2025-01-10 | confidence: medium"),
        ),
    );
    store.write(
        "knowledge/hooks/stop-hook.md",
        &entry(
            "Stop Hook Ordering",
            "The stop-hook runs after the agent finishes.\n\nSee also: [[knowledge:conventions#Section A]]",
            None,
        ),
    );
    store.write(
        "work/auth-refactor/plan.md",
        &entry("Auth Refactor Plan", "Move session tokens into the vault.", None),
    );
    store.write(
        "threads/standup.md",
        &entry("Standup Notes", "Release slipped a day; vault migration blocked.", None),
    );
    store
}

#[test]
fn test_every_heading_is_found_by_its_own_text() {
    let store = sample_store();
    store.full_scan();
    let reader = store.reader();
    let engine = SearchEngine::new(&reader, store.config().search);

    let sections = reader.sections().unwrap();
    assert!(sections.len() >= 7);
    for row in sections {
        let hits = engine
            .search(&row.key.heading, &SearchOptions::default())
            .unwrap();
        assert!(
            hits.iter()
                .any(|h| h.path == row.key.path && h.heading == row.key.heading),
            "heading `{}` of {} not in results {:?}",
            row.key.heading,
            row.key.path,
            hits.iter().map(|h| (&h.path, &h.heading)).collect::<Vec<_>>()
        );
    }
}

#[test]
fn test_plural_query_ranks_backlink_entry_first() {
    let store = TestStore::new();
    store.write(
        "knowledge/backlink-navigation.md",
        &entry("Backlink Navigation", "Jump between entries by following references.", None),
    );
    store.write(
        "knowledge/release-checklist.md",
        &entry("Release Checklist", "Tag the release and publish the binaries.", None),
    );
    store.full_scan();

    let reader = store.reader();
    let hits = SearchEngine::new(&reader, store.config().search)
        .search("backlinks", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits[0].path, "knowledge/backlink-navigation.md");
    assert_eq!(hits[0].heading, "Backlink Navigation");
    assert!(hits.iter().all(|h| h.path != "knowledge/release-checklist.md"));
}

#[test]
fn test_type_filter_and_limit() {
    let store = sample_store();
    store.full_scan();
    let reader = store.reader();
    let engine = SearchEngine::new(&reader, store.config().search);

    let work_only = engine
        .search(
            "vault",
            &SearchOptions {
                limit: 10,
                type_filter: TypeFilter::Work,
            },
        )
        .unwrap();
    assert_eq!(work_only.len(), 1);
    assert_eq!(work_only[0].source_type, SourceType::Work);

    let all = engine.search("vault", &SearchOptions::default()).unwrap();
    assert_eq!(all.len(), 2);

    let limited = engine
        .search(
            "vault",
            &SearchOptions {
                limit: 1,
                type_filter: TypeFilter::All,
            },
        )
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0], all[0]);
}

#[test]
fn test_empty_and_unmatched_queries() {
    let store = sample_store();
    store.full_scan();
    let reader = store.reader();
    let engine = SearchEngine::new(&reader, store.config().search);

    assert!(engine.search("", &SearchOptions::default()).unwrap().is_empty());
    assert!(engine.search("!!", &SearchOptions::default()).unwrap().is_empty());
    assert!(engine.search("zeppelin", &SearchOptions::default()).unwrap().is_empty());
}

#[test]
fn test_snippet_surrounds_match() {
    let store = sample_store();
    store.full_scan();
    let reader = store.reader();
    let hits = SearchEngine::new(&reader, store.config().search)
        .search("context", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits[0].heading, "Error Reporting");
    assert!(hits[0].snippet.contains("context"));
    assert!(hits[0].snippet.chars().count() <= 200);
}

#[test]
fn test_resolve_exact_section_and_fallback() {
    let store = sample_store();
    store.full_scan();
    let reader = store.reader();

    let exact = backlink::resolve(
        &reader,
        &Backlink::parse("[[knowledge:conventions#Section A]]").unwrap(),
    )
    .unwrap();
    let Resolved::Found(exact) = exact else {
        panic!("expected the section to resolve");
    };
    assert_eq!(exact.kind, ResolutionKind::Exact);
    assert_eq!(exact.content, "## Section A\nName modules after what they do.");

    let fallback = backlink::resolve(
        &reader,
        &Backlink::parse("[[knowledge:conventions#Section Z]]").unwrap(),
    )
    .unwrap();
    let Resolved::Found(fallback) = fallback else {
        panic!("expected whole-document fallback");
    };
    assert_eq!(fallback.kind, ResolutionKind::HeadingFallback);
    let on_disk = std::fs::read_to_string(store.root().join("knowledge/conventions.md")).unwrap();
    assert_eq!(fallback.content, on_disk);
}

#[test]
fn test_resolve_nested_and_broken_links() {
    let store = sample_store();
    store.full_scan();
    let reader = store.reader();

    let nested = backlink::resolve(&reader, &Backlink::parse("[[knowledge:hooks/stop-hook]]").unwrap()).unwrap();
    match nested {
        Resolved::Found(r) => {
            assert_eq!(r.kind, ResolutionKind::Whole);
            assert_eq!(r.path, "knowledge/hooks/stop-hook.md");
            assert_eq!(r.title, "Stop Hook Ordering");
        }
        Resolved::Broken { .. } => panic!("nested path should resolve"),
    }

    // Type matters: a knowledge path is not a work path
    let wrong_type = Backlink::parse("[[work:conventions]]").unwrap();
    assert!(backlink::is_broken(&reader, &wrong_type).unwrap());

    let inbound = reader.backlinks_to(SourceType::Knowledge, "conventions").unwrap();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].source_path, "knowledge/hooks/stop-hook.md");
}

#[test]
fn test_rescanning_unchanged_corpus_is_identical() {
    let store = sample_store();
    store.full_scan();
    let (first_digest, first_generation) = {
        let reader = store.reader();
        (reader.content_digest().unwrap(), reader.generation())
    };

    store.full_scan();
    let second_digest = store.reader().content_digest().unwrap();
    assert_eq!(first_digest, second_digest);

    let summary = store.incremental_scan();
    assert!(!summary.changed());
    let reader = store.reader();
    assert_eq!(reader.content_digest().unwrap(), first_digest);
    // Full scans bump the generation, a no-op incremental scan does not
    assert_eq!(reader.generation(), first_generation + 1);
}

#[test]
fn test_incremental_scan_matches_full_rebuild() {
    let store = sample_store();
    store.full_scan();

    store.write(
        "knowledge/backlink-navigation.md",
        &entry(
            "Backlink Navigation",
            "Backlinks now resolve through the index snapshot, including nested paths.",
            None,
        ),
    );
    store.remove("threads/standup.md");
    store.write("knowledge/new-entry.md", &entry("New Entry", "Freshly captured.", None));

    let summary = store.incremental_scan();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.removed, 1);
    let incremental = store.reader().content_digest().unwrap();

    store.full_scan();
    assert_eq!(store.reader().content_digest().unwrap(), incremental);
}

#[test]
fn test_malformed_metadata_still_indexes() {
    let store = TestStore::new();
    store.write(
        "knowledge/noisy.md",
        "# Noisy Capture\n\nStill searchable.\n\n<!-- learned: someday | confidence: sure -->\n",
    );
    store.full_scan();

    let reader = store.reader();
    let entry = reader.entry("knowledge/noisy.md").unwrap().unwrap();
    assert_eq!(entry.meta.learned, None);
    assert_eq!(entry.meta.confidence, None);

    let hits = SearchEngine::new(&reader, store.config().search)
        .search("searchable", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
}
