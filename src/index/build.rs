use crate::backlink::Backlink;
use crate::error::IndexError;
use crate::index::entry::{parse_document, MetaStatus};
use crate::index::store;
use crate::index::types::*;
use crate::index::writer::{FileStamp, IndexWriter};
use crate::utils::progress;
use crate::utils::{get_index_path, STATE_DIR};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A markdown file below one of the type roots
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    /// Store-relative, `/`-separated
    pub rel_path: String,
    pub source_type: SourceType,
    pub link_path: String,
    pub category: String,
    pub stamp: FileStamp,
}

/// Result of walking the store
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<DiscoveredFile>,
    /// Oversized or unreadable files
    pub skipped: usize,
}

/// A parsed file ready to be written
struct LoadedEntry {
    entry: Entry,
    sections: Vec<Section>,
    backlinks: Vec<Backlink>,
}

fn ignore_set(config: &IndexConfig) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in &config.ignored_paths {
        let glob = Glob::new(pattern).map_err(|e| {
            IndexError::InvalidConfig(format!("index.ignored_paths `{}`: {}", pattern, e))
        })?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Canonical store root, or [`IndexError::UnreadableRoot`]
pub fn resolve_root(root_path: &Path) -> Result<PathBuf> {
    let root = root_path
        .canonicalize()
        .map_err(|e| IndexError::UnreadableRoot {
            path: root_path.to_path_buf(),
            reason: e.to_string(),
        })?;
    fs::read_dir(&root).map_err(|e| IndexError::UnreadableRoot {
        path: root.clone(),
        reason: e.to_string(),
    })?;
    Ok(root)
}

fn file_stamp(meta: &fs::Metadata) -> FileStamp {
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    FileStamp {
        mtime_ns,
        size: meta.len() as i64,
    }
}

/// Walk every type root and collect the `.md` files to index, sorted by path
pub fn discover_files(root: &Path, config: &IndexConfig) -> Result<Discovery> {
    let ignored = ignore_set(config)?;
    let mut discovery = Discovery::default();

    for source_type in SourceType::ALL {
        let type_dir = config.roots.dir(source_type);
        let type_root = root.join(type_dir);
        if !type_root.is_dir() {
            tracing::debug!(dir = %type_root.display(), "type root absent");
            continue;
        }

        let walker = WalkBuilder::new(&type_root)
            .hidden(true)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !matches!(name.as_ref(), STATE_DIR | ".git" | "node_modules")
            })
            .build();

        for dent in walker {
            let dent = match dent {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable path");
                    discovery.skipped += 1;
                    continue;
                }
            };
            let path = dent.path();
            if !dent.file_type().is_some_and(|t| t.is_file())
                || path.extension().and_then(|e| e.to_str()) != Some("md")
            {
                continue;
            }

            let Some(rel_path) = relative_slash_path(root, path) else {
                continue;
            };
            if ignored.is_match(&rel_path) {
                tracing::debug!(path = %rel_path, "ignored by config");
                continue;
            }

            let meta = match dent.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %rel_path, error = %err, "cannot stat file");
                    discovery.skipped += 1;
                    continue;
                }
            };
            if meta.len() > config.max_file_size {
                tracing::warn!(path = %rel_path, size = meta.len(), "file too large; skipped");
                discovery.skipped += 1;
                continue;
            }

            let Some(within) = relative_slash_path(&type_root, path) else {
                continue;
            };
            let link_path = within.strip_suffix(".md").unwrap_or(&within).to_string();
            let category = link_path
                .split('/')
                .next()
                .unwrap_or(&link_path)
                .to_string();

            discovery.files.push(DiscoveredFile {
                abs_path: path.to_path_buf(),
                rel_path,
                source_type,
                link_path,
                category,
                stamp: file_stamp(&meta),
            });
        }
    }

    discovery.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(discovery)
}

fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Read and parse one file. Metadata problems are logged, never fatal.
fn load_file(file: &DiscoveredFile) -> Result<LoadedEntry> {
    let bytes = fs::read(&file.abs_path)
        .with_context(|| format!("Failed to read {}", file.rel_path))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| anyhow::anyhow!("{} is not valid UTF-8", file.rel_path))?;

    let parsed = parse_document(&content);
    match &parsed.meta_status {
        MetaStatus::Parsed => {}
        MetaStatus::Missing => tracing::debug!(path = %file.rel_path, "no metadata comment"),
        MetaStatus::Malformed(reason) => {
            tracing::warn!(path = %file.rel_path, %reason, "malformed metadata; indexing with empty metadata")
        }
    }
    for warning in &parsed.warnings {
        tracing::warn!(path = %file.rel_path, "{}", warning);
    }

    let title = parsed.title.clone().unwrap_or_else(|| {
        file.link_path
            .rsplit('/')
            .next()
            .unwrap_or(&file.link_path)
            .to_string()
    });

    Ok(LoadedEntry {
        entry: Entry {
            path: file.rel_path.clone(),
            source_type: file.source_type,
            link_path: file.link_path.clone(),
            category: file.category.clone(),
            title,
            mtime_ns: file.stamp.mtime_ns,
            size: file.stamp.size,
            meta: parsed.meta,
            content,
        },
        sections: parsed.sections,
        backlinks: parsed.backlinks,
    })
}

/// Parse files in parallel; unreadable ones are counted and dropped
fn load_all(files: &[&DiscoveredFile], silent: bool) -> (Vec<LoadedEntry>, usize) {
    let bar = progress::file_bar(files.len() as u64, "Parsing entries...", silent);

    let results: Vec<Option<LoadedEntry>> = files
        .par_iter()
        .map(|file| {
            let loaded = match load_file(file) {
                Ok(l) => Some(l),
                Err(err) => {
                    tracing::warn!(path = %file.rel_path, error = %err, "skipping entry");
                    None
                }
            };
            if let Some(ref b) = bar {
                b.inc(1);
            }
            loaded
        })
        .collect();

    if let Some(b) = bar {
        b.finish_and_clear();
    }

    let failed = results.iter().filter(|r| r.is_none()).count();
    (results.into_iter().flatten().collect(), failed)
}

/// Reindex every entry of the store in one write transaction
pub fn full_scan(root_path: &Path, config: &IndexConfig, silent: bool) -> Result<ScanSummary> {
    let root = resolve_root(root_path)?;
    let index_path = get_index_path(&root, config);

    let walk = progress::spinner("Discovering entries...", silent);
    let discovery = discover_files(&root, config)?;
    if let Some(s) = walk {
        s.finish_with_message(format!("Found {} entries", discovery.files.len()));
    }

    let files: Vec<&DiscoveredFile> = discovery.files.iter().collect();
    let (loaded, failed) = load_all(&files, silent);

    let mut writer = IndexWriter::open_verified(&index_path, config)?;
    let mut txn = writer.begin()?;
    let previous = txn.stored_files()?;

    let mut summary = ScanSummary {
        skipped: discovery.skipped + failed,
        ..Default::default()
    };
    txn.clear_all()?;
    for item in &loaded {
        txn.upsert_entry(&item.entry, &item.sections, &item.backlinks)?;
        if previous.contains_key(&item.entry.path) {
            summary.updated += 1;
        } else {
            summary.added += 1;
        }
    }
    let present: FxHashSet<&str> = loaded.iter().map(|l| l.entry.path.as_str()).collect();
    summary.removed = previous
        .keys()
        .filter(|p| !present.contains(p.as_str()))
        .count();
    let generation = txn.commit()?;

    tracing::info!(
        root = %root.display(),
        entries = loaded.len(),
        skipped = summary.skipped,
        generation,
        "full scan complete"
    );
    Ok(summary)
}

/// Rebuild the index; `force` deletes the database file first
pub fn build_index(root_path: &Path, config: &IndexConfig, force: bool, silent: bool) -> Result<ScanSummary> {
    let root = resolve_root(root_path)?;
    if force {
        let index_path = get_index_path(&root, config);
        store::remove_database(&index_path).context("Failed to remove existing index")?;
    }
    full_scan(&root, config, silent)
}

/// Bring the index up to date, reparsing only files whose mtime or size
/// changed. Without changes no write transaction is opened.
pub fn incremental_scan(root_path: &Path, config: &IndexConfig) -> Result<ScanSummary> {
    let root = resolve_root(root_path)?;
    let index_path = get_index_path(&root, config);
    let discovery = discover_files(&root, config)?;

    let mut writer = IndexWriter::open(&index_path, config)?;
    if writer.was_rebuilt() {
        tracing::warn!(path = %index_path.display(), "index was unreadable; reindexing every entry");
    }
    let stored = writer.stored_files()?;

    let changed: Vec<&DiscoveredFile> = discovery
        .files
        .iter()
        .filter(|f| stored.get(&f.rel_path) != Some(&f.stamp))
        .collect();
    let removed: Vec<&String> = stored
        .keys()
        .filter(|p| discovery.files.binary_search_by(|f| f.rel_path.as_str().cmp(p.as_str())).is_err())
        .collect();

    let mut summary = ScanSummary {
        unchanged: discovery.files.len() - changed.len(),
        skipped: discovery.skipped,
        ..Default::default()
    };
    if changed.is_empty() && removed.is_empty() {
        tracing::debug!(unchanged = summary.unchanged, "index up to date");
        return Ok(summary);
    }

    // Parse before taking the lock; the write phase only touches the database
    let (loaded, failed) = load_all(&changed, true);
    summary.skipped += failed;

    let mut txn = writer.begin()?;
    // Another writer may have committed since the pre-check
    let current = txn.stored_files()?;
    for item in &loaded {
        let stamp = FileStamp {
            mtime_ns: item.entry.mtime_ns,
            size: item.entry.size,
        };
        match current.get(&item.entry.path) {
            Some(s) if *s == stamp => summary.unchanged += 1,
            Some(_) => {
                txn.upsert_entry(&item.entry, &item.sections, &item.backlinks)?;
                summary.updated += 1;
            }
            None => {
                txn.upsert_entry(&item.entry, &item.sections, &item.backlinks)?;
                summary.added += 1;
            }
        }
    }
    for path in removed {
        if txn.remove_entry(path)? {
            summary.removed += 1;
        }
    }
    let generation = txn.commit()?;

    tracing::info!(
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        generation,
        "incremental scan complete"
    );
    Ok(summary)
}

/// Remember the repository root used for commit-history queries
pub fn record_repo_root(root_path: &Path, config: &IndexConfig, repo_root: &Path) -> Result<()> {
    let root = resolve_root(root_path)?;
    let repo = repo_root.canonicalize().map_err(|e| IndexError::UnreadableRoot {
        path: repo_root.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut writer = IndexWriter::open(&get_index_path(&root, config), config)?;
    let mut txn = writer.begin()?;
    txn.set_meta("repo_root", &repo.to_string_lossy())?;
    txn.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::reader::IndexReader;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discover_link_paths_and_categories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "knowledge/conventions.md", "# C\n");
        write(dir.path(), "knowledge/hooks/stop-hook.md", "# S\n");
        write(dir.path(), "work/auth-refactor/plan.md", "# P\n");
        write(dir.path(), "threads/standup.md", "# T\n");
        write(dir.path(), "knowledge/notes.txt", "not markdown");
        write(dir.path(), "knowledge/.hidden/x.md", "# hidden\n");
        write(dir.path(), "knowledge/wip.draft.md", "# draft\n");

        let discovery = discover_files(dir.path(), &IndexConfig::default()).unwrap();
        let found: Vec<(&str, &str, &str)> = discovery
            .files
            .iter()
            .map(|f| (f.rel_path.as_str(), f.link_path.as_str(), f.category.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("knowledge/conventions.md", "conventions", "conventions"),
                ("knowledge/hooks/stop-hook.md", "hooks/stop-hook", "hooks"),
                ("threads/standup.md", "standup", "standup"),
                ("work/auth-refactor/plan.md", "auth-refactor/plan", "auth-refactor"),
            ]
        );
    }

    #[test]
    fn test_oversized_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "knowledge/big.md", &"word ".repeat(100));
        let config = IndexConfig {
            max_file_size: 64,
            ..Default::default()
        };
        let discovery = discover_files(dir.path(), &config).unwrap();
        assert!(discovery.files.is_empty());
        assert_eq!(discovery.skipped, 1);
    }

    #[test]
    fn test_non_utf8_entry_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "knowledge/good.md", "# Good\n");
        let bad = dir.path().join("knowledge/bad.md");
        fs::write(&bad, [0xffu8, 0xfe, 0x00, 0x41]).unwrap();

        let summary = full_scan(dir.path(), &IndexConfig::default(), true).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_missing_root_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = full_scan(&dir.path().join("nope"), &IndexConfig::default(), true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::UnreadableRoot { .. })
        ));
    }

    #[test]
    fn test_incremental_tracks_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default();
        write(dir.path(), "knowledge/a.md", "# A\nalpha\n");
        write(dir.path(), "knowledge/b.md", "# B\nbeta\n");

        let first = incremental_scan(dir.path(), &config).unwrap();
        assert_eq!(first.added, 2);

        let again = incremental_scan(dir.path(), &config).unwrap();
        assert!(!again.changed());
        assert_eq!(again.unchanged, 2);

        write(dir.path(), "knowledge/a.md", "# A\nalpha with more words\n");
        fs::remove_file(dir.path().join("knowledge/b.md")).unwrap();
        let third = incremental_scan(dir.path(), &config).unwrap();
        assert_eq!(third.updated, 1);
        assert_eq!(third.removed, 1);

        let index_path = get_index_path(&resolve_root(dir.path()).unwrap(), &config);
        let reader = IndexReader::open(&index_path).unwrap().unwrap();
        assert_eq!(reader.entries().unwrap().len(), 1);
        assert_eq!(reader.postings("beta").unwrap().len(), 0);
    }

    #[test]
    fn test_incremental_over_corrupt_index_reindexes_all() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default();
        write(dir.path(), "knowledge/a.md", "# A\nalpha\n");
        write(dir.path(), "knowledge/b.md", "# B\nbeta\n");
        full_scan(dir.path(), &config, true).unwrap();

        let index_path = get_index_path(&resolve_root(dir.path()).unwrap(), &config);
        store::remove_database(&index_path).unwrap();
        fs::write(&index_path, vec![0x17u8; 4096]).unwrap();

        let summary = incremental_scan(dir.path(), &config).unwrap();
        assert_eq!(summary.added, 2);
        let reader = IndexReader::open(&index_path).unwrap().unwrap();
        assert_eq!(reader.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_unchanged_incremental_keeps_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default();
        write(dir.path(), "knowledge/a.md", "# A\nalpha\n");
        incremental_scan(dir.path(), &config).unwrap();

        let index_path = get_index_path(&resolve_root(dir.path()).unwrap(), &config);
        let before = IndexReader::open(&index_path).unwrap().unwrap().generation();
        incremental_scan(dir.path(), &config).unwrap();
        let after = IndexReader::open(&index_path).unwrap().unwrap().generation();
        assert_eq!(before, after);
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "knowledge/hooks/untitled-note.md", "just prose, no heading\n");
        let config = IndexConfig::default();
        full_scan(dir.path(), &config, true).unwrap();

        let index_path = get_index_path(&resolve_root(dir.path()).unwrap(), &config);
        let reader = IndexReader::open(&index_path).unwrap().unwrap();
        let entry = reader.entry("knowledge/hooks/untitled-note.md").unwrap().unwrap();
        assert_eq!(entry.title, "untitled-note");
        assert_eq!(reader.sections_of(&entry.path).unwrap()[0].key.heading, "");
    }
}
