//! SQLite persistence for the index: schema, pragmas and open-time checks.
//!
//! One database file holds the whole index (entries, sections, postings,
//! backlink graph, similarity table). WAL mode gives the locking discipline:
//! a single writer at a time (`BEGIN IMMEDIATE` with a bounded busy timeout)
//! and readers that keep a consistent snapshot without ever waiting on it.

use crate::error::IndexError;
use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Bumped whenever the table layout changes; older files are rebuilt.
pub const SCHEMA_VERSION: i64 = 1;

/// Readers only wait this long for WAL recovery by another connection
const READER_BUSY_TIMEOUT_MS: u64 = 250;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS entries (
    path          TEXT PRIMARY KEY,
    source_type   TEXT NOT NULL,
    link_path     TEXT NOT NULL,
    category      TEXT NOT NULL,
    title         TEXT NOT NULL,
    mtime_ns      INTEGER NOT NULL,
    size          INTEGER NOT NULL,
    learned       TEXT,
    confidence    TEXT,
    source        TEXT,
    related_files TEXT NOT NULL,
    extra         TEXT NOT NULL,
    content       TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS entries_link ON entries(source_type, link_path);

CREATE TABLE IF NOT EXISTS sections (
    id      INTEGER PRIMARY KEY,
    path    TEXT NOT NULL REFERENCES entries(path) ON DELETE CASCADE,
    heading TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    body    TEXT NOT NULL,
    length  INTEGER NOT NULL,
    UNIQUE (path, heading)
);

CREATE TABLE IF NOT EXISTS postings (
    term       TEXT NOT NULL,
    section_id INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
    tf         INTEGER NOT NULL,
    positions  BLOB NOT NULL,
    PRIMARY KEY (term, section_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS postings_section ON postings(section_id);

CREATE TABLE IF NOT EXISTS backlinks (
    source_path    TEXT NOT NULL REFERENCES entries(path) ON DELETE CASCADE,
    ordinal        INTEGER NOT NULL,
    link_type      TEXT NOT NULL,
    target_path    TEXT NOT NULL,
    target_heading TEXT,
    PRIMARY KEY (source_path, ordinal)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS backlinks_target ON backlinks(link_type, target_path);

CREATE TABLE IF NOT EXISTS similarity (
    source_id INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
    score     REAL NOT NULL,
    rank      INTEGER NOT NULL,
    PRIMARY KEY (source_id, rank)
) WITHOUT ROWID;
";

/// Translate SQLite failures into the typed conditions callers act on
pub(crate) fn classify(err: rusqlite::Error, path: &Path) -> anyhow::Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => IndexError::Locked {
            path: path.to_path_buf(),
        }
        .into(),
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => IndexError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
        .into(),
        _ => anyhow::Error::new(err).context(format!("index database {}", path.display())),
    }
}

/// Apply journal and safety pragmas to the writer connection
fn apply_writer_pragmas(conn: &Connection, lock_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(lock_timeout)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch(
        "
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )
}

/// Verify the file is a database with a schema we understand. `deep` adds
/// a page-level `quick_check` (full rebuilds only).
/// Returns false for a brand-new (empty) database.
fn check_health(conn: &Connection, path: &Path, deep: bool) -> Result<bool> {
    if deep {
        let status: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| classify(e, path))?;
        if status != "ok" {
            return Err(IndexError::Corrupt {
                path: path.to_path_buf(),
                reason: status,
            }
            .into());
        }
    }

    let has_meta: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta')",
            [],
            |row| row.get(0),
        )
        .map_err(|e| classify(e, path))?;
    if !has_meta {
        return Ok(false);
    }

    let version: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()
        .map_err(|e| classify(e, path))?;
    match version.as_deref().map(str::parse::<i64>) {
        Some(Ok(SCHEMA_VERSION)) => Ok(true),
        other => Err(IndexError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unexpected schema version {:?}", other),
        }
        .into()),
    }
}

fn create_schema(conn: &Connection, path: &Path) -> Result<()> {
    conn.execute_batch(SCHEMA).map_err(|e| classify(e, path))?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1), ('generation', '0')",
        [SCHEMA_VERSION.to_string()],
    )
    .map_err(|e| classify(e, path))?;
    Ok(())
}

/// Open the writer connection, creating the database if needed. `deep`
/// runs `quick_check` over every page; incremental writers skip it.
pub fn open_writer(path: &Path, lock_timeout: Duration, deep: bool) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IndexError::UnreadableRoot {
            path: parent.to_path_buf(),
            reason: format!("index location is not writable: {}", e),
        })?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open index {}", path.display()))?;
    apply_writer_pragmas(&conn, lock_timeout).map_err(|e| classify(e, path))?;

    if !check_health(&conn, path, deep)? {
        tracing::info!(path = %path.display(), "creating index schema");
        create_schema(&conn, path)?;
    }

    Ok(conn)
}

/// Open the writer connection; a corrupt or outdated file is removed and
/// recreated empty. Returns the connection and whether a rebuild happened.
pub fn open_or_recreate(path: &Path, lock_timeout: Duration, deep: bool) -> Result<(Connection, bool)> {
    match open_writer(path, lock_timeout, deep) {
        Ok(conn) => Ok((conn, false)),
        Err(err) => match err.downcast_ref::<IndexError>() {
            Some(IndexError::Corrupt { reason, .. }) => {
                tracing::warn!(path = %path.display(), %reason, "index is corrupt; rebuilding");
                remove_database(path)?;
                Ok((open_writer(path, lock_timeout, false)?, true))
            }
            _ => Err(err),
        },
    }
}

/// Open a query-only connection. `None` when no index exists yet.
pub fn open_reader(path: &Path) -> Result<Option<Connection>> {
    if !path.exists() {
        return Ok(None);
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open index {}", path.display()))?;
    conn.busy_timeout(Duration::from_millis(READER_BUSY_TIMEOUT_MS))
        .map_err(|e| classify(e, path))?;
    conn.execute_batch("PRAGMA query_only = ON;")
        .map_err(|e| classify(e, path))?;

    if !check_health(&conn, path, false)? {
        // The file exists but no schema was ever committed
        return Ok(None);
    }

    Ok(Some(conn))
}

/// Delete the database and its WAL side files
pub fn remove_database(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut os = path.as_os_str().to_os_string();
        os.push(suffix);
        let file = std::path::PathBuf::from(os);
        if file.exists() {
            fs::remove_file(&file)
                .with_context(|| format!("Failed to remove {}", file.display()))?;
        }
    }
    Ok(())
}
