use crate::backlink::Backlink;
use crate::error::IndexError;
use crate::index::build;
use crate::index::store;
use crate::index::types::*;
use crate::index::writer::read_generation;
use crate::utils::{decode_positions, get_index_path, AppConfig};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use rustc_hash::FxHasher;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

/// One posting list element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub section_id: SectionId,
    pub tf: u32,
    pub positions: Vec<u32>,
}

/// A stored outbound reference together with the entry it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub source_path: String,
    pub link: Backlink,
}

/// Aggregate counts for `kdex stats`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexCounts {
    pub entries: u64,
    pub entries_by_type: BTreeMap<String, u64>,
    pub sections: u64,
    pub terms: u64,
    pub postings: u64,
    pub backlinks: u64,
    pub similarity_edges: u64,
    pub avg_section_length: f64,
}

const SECTION_COLUMNS: &str = "s.id, s.path, s.heading, s.ordinal, s.body, s.length, e.source_type, e.title";
const ENTRY_COLUMNS: &str = "path, source_type, link_path, category, title, mtime_ns, size, \
                             learned, confidence, source, related_files, extra, content";

/// A consistent, read-only view of the index.
///
/// The connection holds a deferred read transaction for its whole lifetime,
/// so every query sees the same committed generation even while a writer
/// commits underneath it.
pub struct IndexReader {
    conn: Connection,
    index_path: PathBuf,
    generation: u64,
}

impl IndexReader {
    /// Open a snapshot of an existing index. `None` when there is no index.
    pub fn open(index_path: &Path) -> Result<Option<Self>> {
        let Some(conn) = store::open_reader(index_path)? else {
            return Ok(None);
        };

        conn.execute_batch("BEGIN DEFERRED")
            .map_err(|e| store::classify(e, index_path))?;
        // The first read pins the WAL snapshot
        let generation = read_generation(&conn)?;
        tracing::debug!(path = %index_path.display(), generation, "opened index snapshot");

        Ok(Some(Self {
            conn,
            index_path: index_path.to_path_buf(),
            generation,
        }))
    }

    /// Open the index of a store, building it first when it is missing or
    /// corrupt
    pub fn open_or_build(store_root: &Path, config: &AppConfig) -> Result<Self> {
        let index_path = get_index_path(store_root, &config.index);

        match Self::open(&index_path) {
            Ok(Some(reader)) => return Ok(reader),
            Ok(None) => {
                tracing::info!(root = %store_root.display(), "no index yet; building");
            }
            Err(err) if matches!(err.downcast_ref::<IndexError>(), Some(IndexError::Corrupt { .. })) => {
                tracing::warn!(error = %err, "index unreadable; rebuilding");
            }
            Err(err) => return Err(err),
        }

        build::full_scan(store_root, &config.index, true)?;
        Self::open(&index_path)?.ok_or_else(|| {
            anyhow::anyhow!("index at {} missing after build", index_path.display())
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn meta_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    /// Whether the stored similarity table was computed at this generation
    pub fn similarity_current(&self) -> Result<bool> {
        Ok(self.meta_value("similarity_generation")?.and_then(|v| v.parse::<u64>().ok())
            == Some(self.generation))
    }

    /// Number of sections (N for BM25 and TF-IDF)
    pub fn section_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sections", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn avg_section_length(&self) -> Result<f64> {
        let avg: Option<f64> = self
            .conn
            .query_row("SELECT AVG(length) FROM sections", [], |row| row.get(0))?;
        Ok(avg.unwrap_or(0.0))
    }

    pub fn doc_freq(&self, term: &str) -> Result<u64> {
        let df: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM postings WHERE term = ?1",
            [term],
            |row| row.get(0),
        )?;
        Ok(df as u64)
    }

    /// Posting list for a term, ordered by section id
    pub fn postings(&self, term: &str) -> Result<Vec<Posting>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT section_id, tf, positions FROM postings WHERE term = ?1 ORDER BY section_id",
        )?;
        let rows = stmt.query_map([term], |row| {
            Ok((
                row.get::<_, SectionId>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut postings = Vec::new();
        for row in rows {
            let (section_id, tf, blob) = row?;
            postings.push(Posting {
                section_id,
                tf,
                positions: decode_positions(&blob)
                    .with_context(|| format!("positions for `{}` in section {}", term, section_id))?,
            });
        }
        Ok(postings)
    }

    /// Every `(term, section, tf)` triple, grouped by term
    pub fn term_frequencies(&self) -> Result<Vec<(String, SectionId, u32)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT term, section_id, tf FROM postings ORDER BY term, section_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn section(&self, id: SectionId) -> Result<Option<SectionRow>> {
        let sql = format!(
            "SELECT {} FROM sections s JOIN entries e ON e.path = s.path WHERE s.id = ?1",
            SECTION_COLUMNS
        );
        Ok(self
            .conn
            .prepare_cached(&sql)?
            .query_row([id], section_from_row)
            .optional()?)
    }

    pub fn section_by_key(&self, path: &str, heading: &str) -> Result<Option<SectionRow>> {
        let sql = format!(
            "SELECT {} FROM sections s JOIN entries e ON e.path = s.path
             WHERE s.path = ?1 AND s.heading = ?2",
            SECTION_COLUMNS
        );
        Ok(self
            .conn
            .prepare_cached(&sql)?
            .query_row([path, heading], section_from_row)
            .optional()?)
    }

    /// All sections ordered by `(path, ordinal)`
    pub fn sections(&self) -> Result<Vec<SectionRow>> {
        let sql = format!(
            "SELECT {} FROM sections s JOIN entries e ON e.path = s.path ORDER BY s.path, s.ordinal",
            SECTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], section_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn sections_of(&self, path: &str) -> Result<Vec<SectionRow>> {
        let sql = format!(
            "SELECT {} FROM sections s JOIN entries e ON e.path = s.path
             WHERE s.path = ?1 ORDER BY s.ordinal",
            SECTION_COLUMNS
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([path], section_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// All entries ordered by path
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let sql = format!("SELECT {} FROM entries ORDER BY path", ENTRY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], entry_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn entry(&self, path: &str) -> Result<Option<Entry>> {
        let sql = format!("SELECT {} FROM entries WHERE path = ?1", ENTRY_COLUMNS);
        Ok(self
            .conn
            .prepare_cached(&sql)?
            .query_row([path], entry_from_row)
            .optional()?)
    }

    /// Look up an entry by what a backlink names
    pub fn entry_by_link(&self, source_type: SourceType, link_path: &str) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE source_type = ?1 AND link_path = ?2",
            ENTRY_COLUMNS
        );
        Ok(self
            .conn
            .prepare_cached(&sql)?
            .query_row([source_type.as_str(), link_path], entry_from_row)
            .optional()?)
    }

    /// Outbound references of one entry, in document order
    pub fn backlinks_from(&self, path: &str) -> Result<Vec<Backlink>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT source_path, link_type, target_path, target_heading FROM backlinks
             WHERE source_path = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map([path], link_from_row)?;
        let records: Vec<LinkRecord> = rows.collect::<rusqlite::Result<_>>()?;
        Ok(records.into_iter().map(|r| r.link).collect())
    }

    /// Inbound references to a document, whichever spelling of its path
    /// they used
    pub fn backlinks_to(&self, source_type: SourceType, link_path: &str) -> Result<Vec<LinkRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT source_path, link_type, target_path, target_heading FROM backlinks
             WHERE link_type = ?1 ORDER BY source_path, ordinal",
        )?;
        let rows = stmt.query_map([source_type.as_str()], link_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            if record.link.candidates().iter().any(|c| c == link_path) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Stored neighbors of a section, best first
    pub fn similar_to(&self, id: SectionId) -> Result<Vec<SimilarityEdge>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT source_id, target_id, score, rank FROM similarity
             WHERE source_id = ?1 ORDER BY rank",
        )?;
        let rows = stmt.query_map([id], edge_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Every stored edge (both directions)
    pub fn similarity_edges(&self) -> Result<Vec<SimilarityEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, target_id, score, rank FROM similarity ORDER BY source_id, rank",
        )?;
        let rows = stmt.query_map([], edge_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn counts(&self) -> Result<IndexCounts> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        let mut entries_by_type = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT source_type, COUNT(*) FROM entries GROUP BY source_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (kind, n) = row?;
            entries_by_type.insert(kind, n as u64);
        }

        Ok(IndexCounts {
            entries: count("SELECT COUNT(*) FROM entries")?,
            entries_by_type,
            sections: count("SELECT COUNT(*) FROM sections")?,
            terms: count("SELECT COUNT(DISTINCT term) FROM postings")?,
            postings: count("SELECT COUNT(*) FROM postings")?,
            backlinks: count("SELECT COUNT(*) FROM backlinks")?,
            similarity_edges: count("SELECT COUNT(*) FROM similarity")?,
            avg_section_length: self.avg_section_length()?,
        })
    }

    /// Canonical digest of the index content. Rows are keyed by
    /// `(path, heading)` rather than row ids, and `meta` is excluded, so two
    /// scans of an unchanged corpus produce the same value.
    pub fn content_digest(&self) -> Result<String> {
        let mut hasher = FxHasher::default();
        let queries = [
            "SELECT path, source_type, link_path, category, title, mtime_ns, size,
                    COALESCE(learned, ''), COALESCE(confidence, ''), COALESCE(source, ''),
                    related_files, extra, content
             FROM entries ORDER BY path",
            "SELECT path, heading, ordinal, body, length FROM sections ORDER BY path, heading",
            "SELECT s.path, s.heading, p.term, p.tf, hex(p.positions)
             FROM postings p JOIN sections s ON s.id = p.section_id
             ORDER BY s.path, s.heading, p.term",
            "SELECT source_path, ordinal, link_type, target_path, COALESCE(target_heading, '')
             FROM backlinks ORDER BY source_path, ordinal",
            "SELECT a.path, a.heading, b.path, b.heading, sim.rank, printf('%.12f', sim.score)
             FROM similarity sim
             JOIN sections a ON a.id = sim.source_id
             JOIN sections b ON b.id = sim.target_id
             ORDER BY a.path, a.heading, sim.rank",
        ];

        for sql in queries {
            hasher.write(sql.as_bytes());
            let mut stmt = self.conn.prepare(sql)?;
            let columns = stmt.column_count();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                for i in 0..columns {
                    let value: rusqlite::types::Value = row.get(i)?;
                    match value {
                        rusqlite::types::Value::Integer(n) => hasher.write_i64(n),
                        rusqlite::types::Value::Text(s) => hasher.write(s.as_bytes()),
                        rusqlite::types::Value::Real(f) => hasher.write_u64(f.to_bits()),
                        rusqlite::types::Value::Blob(b) => hasher.write(&b),
                        rusqlite::types::Value::Null => hasher.write_u8(0),
                    }
                    hasher.write_u8(0x1f);
                }
                hasher.write_u8(0x1e);
            }
        }

        Ok(format!("{:016x}", hasher.finish()))
    }
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        let _ = self.conn.execute_batch("ROLLBACK");
    }
}

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<SectionRow> {
    let source_type: String = row.get(6)?;
    Ok(SectionRow {
        id: row.get(0)?,
        key: SectionKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        ordinal: row.get(3)?,
        body: row.get(4)?,
        length: row.get(5)?,
        source_type: parse_column(6, &source_type)?,
        title: row.get(7)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let source_type: String = row.get(1)?;
    let learned: Option<String> = row.get(7)?;
    let confidence: Option<String> = row.get(8)?;
    let related_files: String = row.get(10)?;
    let extra: String = row.get(11)?;

    Ok(Entry {
        path: row.get(0)?,
        source_type: parse_column(1, &source_type)?,
        link_path: row.get(2)?,
        category: row.get(3)?,
        title: row.get(4)?,
        mtime_ns: row.get(5)?,
        size: row.get(6)?,
        meta: EntryMeta {
            learned: learned.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            confidence: confidence.and_then(|c| c.parse().ok()),
            source: row.get(9)?,
            related_files: json_column(10, &related_files)?,
            extra: json_column(11, &extra)?,
        },
        content: row.get(12)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LinkRecord> {
    let link_type: String = row.get(1)?;
    Ok(LinkRecord {
        source_path: row.get(0)?,
        link: Backlink {
            link_type: parse_column(1, &link_type)?,
            path: row.get(2)?,
            heading: row.get(3)?,
        },
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<SimilarityEdge> {
    Ok(SimilarityEdge {
        source: row.get(0)?,
        target: row.get(1)?,
        score: row.get(2)?,
        rank: row.get(3)?,
    })
}

fn parse_column<T: std::str::FromStr<Err = String>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
