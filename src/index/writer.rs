use crate::backlink::Backlink;
use crate::error::IndexError;
use crate::index::store::{self, classify};
use crate::index::types::*;
use crate::utils::{encode_positions, term_stats, token_length, tokenize};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the index remembers about a file to decide whether to reparse it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime_ns: i64,
    pub size: i64,
}

/// Index writer: owns the single write connection for a store
pub struct IndexWriter {
    index_path: PathBuf,
    conn: Connection,
    rebuilt: bool,
}

impl IndexWriter {
    /// Open (or create) the index for writing. A corrupt file is replaced by
    /// an empty database; [`IndexWriter::was_rebuilt`] reports that. Only the
    /// header and schema version are checked.
    pub fn open(index_path: &Path, config: &IndexConfig) -> Result<Self> {
        Self::open_with(index_path, config, false)
    }

    /// Like [`IndexWriter::open`], but also verifies every page first. Used
    /// by full rebuilds, whose cost is proportional to the corpus anyway.
    pub fn open_verified(index_path: &Path, config: &IndexConfig) -> Result<Self> {
        Self::open_with(index_path, config, true)
    }

    fn open_with(index_path: &Path, config: &IndexConfig, deep: bool) -> Result<Self> {
        let timeout = Duration::from_millis(config.lock_timeout_ms);
        let (conn, rebuilt) = store::open_or_recreate(index_path, timeout, deep)?;
        Ok(Self {
            index_path: index_path.to_path_buf(),
            conn,
            rebuilt,
        })
    }

    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    /// Stamps of every indexed file, read outside any write transaction
    pub fn stored_files(&self) -> Result<FxHashMap<String, FileStamp>> {
        load_stamps(&self.conn)
    }

    /// Take the write lock. Fails with [`IndexError::Locked`] once the busy
    /// timeout elapses.
    pub fn begin(&mut self) -> Result<WriteTxn<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| classify(e, &self.index_path))?;
        let generation = read_generation(&tx)?;
        tracing::debug!(generation, "write transaction started");
        Ok(WriteTxn {
            tx,
            generation,
            entries_changed: false,
            similarity_written: false,
        })
    }
}

fn load_stamps(conn: &Connection) -> Result<FxHashMap<String, FileStamp>> {
    let mut stmt = conn.prepare("SELECT path, mtime_ns, size FROM entries")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            FileStamp {
                mtime_ns: row.get(1)?,
                size: row.get(2)?,
            },
        ))
    })?;

    let mut stamps = FxHashMap::default();
    for row in rows {
        let (path, stamp) = row?;
        stamps.insert(path, stamp);
    }
    Ok(stamps)
}

pub(crate) fn read_generation(conn: &Connection) -> Result<u64> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'generation'", [], |row| row.get(0))
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// An open `BEGIN IMMEDIATE` transaction. Dropping it without
/// [`WriteTxn::commit`] rolls everything back.
pub struct WriteTxn<'a> {
    tx: rusqlite::Transaction<'a>,
    generation: u64,
    entries_changed: bool,
    similarity_written: bool,
}

impl WriteTxn<'_> {
    /// Generation as of the start of this transaction
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fail with [`IndexError::Conflict`] if the index moved on since a
    /// snapshot taken at `expected`
    pub fn expect_generation(&self, expected: u64) -> Result<()> {
        if self.generation != expected {
            return Err(IndexError::Conflict {
                expected,
                found: self.generation,
            }
            .into());
        }
        Ok(())
    }

    /// Stamps as seen under the write lock
    pub fn stored_files(&self) -> Result<FxHashMap<String, FileStamp>> {
        load_stamps(&self.tx)
    }

    /// Replace an entry with its freshly parsed sections and backlinks
    pub fn upsert_entry(
        &mut self,
        entry: &Entry,
        sections: &[Section],
        backlinks: &[Backlink],
    ) -> Result<()> {
        self.tx
            .execute("DELETE FROM entries WHERE path = ?1", [&entry.path])?;

        let related_files = serde_json::to_string(&entry.meta.related_files)?;
        let extra = serde_json::to_string(&entry.meta.extra)?;
        self.tx
            .prepare_cached(
                "INSERT INTO entries (path, source_type, link_path, category, title, mtime_ns, size,
                                      learned, confidence, source, related_files, extra, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?
            .execute(params![
                entry.path,
                entry.source_type.as_str(),
                entry.link_path,
                entry.category,
                entry.title,
                entry.mtime_ns,
                entry.size,
                entry.meta.learned.map(|d| d.format("%Y-%m-%d").to_string()),
                entry.meta.confidence.map(|c| c.as_str()),
                entry.meta.source,
                related_files,
                extra,
                entry.content,
            ])
            .with_context(|| format!("Failed to store entry {}", entry.path))?;

        for (ordinal, section) in sections.iter().enumerate() {
            let tokens = tokenize(&section.body);
            self.tx
                .prepare_cached(
                    "INSERT INTO sections (path, heading, ordinal, body, length)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![
                    entry.path,
                    section.heading,
                    ordinal as u32,
                    section.body,
                    token_length(&tokens),
                ])?;
            let section_id = self.tx.last_insert_rowid();

            let mut insert = self.tx.prepare_cached(
                "INSERT INTO postings (term, section_id, tf, positions) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (term, stats) in term_stats(&tokens) {
                insert.execute(params![
                    term,
                    section_id,
                    stats.tf,
                    encode_positions(&stats.positions)
                ])?;
            }
        }

        for (ordinal, link) in backlinks.iter().enumerate() {
            self.tx
                .prepare_cached(
                    "INSERT INTO backlinks (source_path, ordinal, link_type, target_path, target_heading)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![
                    entry.path,
                    ordinal as u32,
                    link.link_type.as_str(),
                    link.path,
                    link.heading,
                ])?;
        }

        self.entries_changed = true;
        Ok(())
    }

    /// Drop an entry and everything derived from it. Returns whether it existed.
    pub fn remove_entry(&mut self, path: &str) -> Result<bool> {
        let removed = self.tx.execute("DELETE FROM entries WHERE path = ?1", [path])? > 0;
        self.entries_changed |= removed;
        Ok(removed)
    }

    /// Empty every content table (full rebuild)
    pub fn clear_all(&mut self) -> Result<()> {
        self.tx.execute_batch(
            "DELETE FROM similarity;
             DELETE FROM backlinks;
             DELETE FROM postings;
             DELETE FROM sections;
             DELETE FROM entries;",
        )?;
        self.entries_changed = true;
        Ok(())
    }

    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Swap in a complete similarity table
    pub fn replace_similarity(&mut self, edges: &[SimilarityEdge]) -> Result<()> {
        self.tx.execute("DELETE FROM similarity", [])?;
        let mut insert = self.tx.prepare_cached(
            "INSERT INTO similarity (source_id, target_id, score, rank) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for edge in edges {
            insert.execute(params![edge.source, edge.target, edge.score, edge.rank])?;
        }
        self.similarity_written = true;
        Ok(())
    }

    /// Commit. Any mutation bumps the generation; entry changes also
    /// invalidate the similarity table. Returns the committed generation.
    pub fn commit(self) -> Result<u64> {
        let mut generation = self.generation;
        if self.entries_changed && !self.similarity_written {
            self.tx.execute("DELETE FROM similarity", [])?;
        }
        if self.entries_changed || self.similarity_written {
            generation += 1;
            self.tx.execute(
                "UPDATE meta SET value = ?1 WHERE key = 'generation'",
                [generation.to_string()],
            )?;
        }
        if self.similarity_written {
            self.tx.execute(
                "INSERT INTO meta (key, value) VALUES ('similarity_generation', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [generation.to_string()],
            )?;
        }
        self.tx.commit().context("Failed to commit index transaction")?;
        tracing::debug!(generation, "write transaction committed");
        Ok(generation)
    }
}
