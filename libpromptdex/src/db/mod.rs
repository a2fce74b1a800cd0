//! Index store: connection bootstrap, schema ensure and maintenance helpers.
//!
//! There is no version table. Startup creates the base tables, probes
//! `PRAGMA table_info(images)` and adds whatever additive column is missing,
//! then sets up (or tears down) the full-text index.

mod database;
mod query;

pub use database::{Database, IndexOptions};
pub use query::{FacetScope, Facets, SearchPage, SearchQuery, SortOrder};

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::utils::{file_name_of, folder_of, normalize_path};

const BASE_SQL: &str = include_str!("schema/base.sql");
const INDEXES_SQL: &str = include_str!("schema/indexes.sql");
const FTS_SQL: &str = include_str!("schema/fts.sql");
const FTS_DROP_SQL: &str = include_str!("schema/fts_drop.sql");

/// Columns added after the base table shipped, in the order they appeared.
/// Each is applied with `ALTER TABLE … ADD COLUMN` only when missing.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("folder", "TEXT NOT NULL DEFAULT ''"),
    ("mtime", "INTEGER NOT NULL DEFAULT 0"),
    ("file_size", "INTEGER NOT NULL DEFAULT 0"),
    ("seed", "TEXT"),
    ("steps", "INTEGER"),
    ("sampler", "TEXT"),
    ("scheduler", "TEXT"),
    ("cfg_scale", "REAL"),
    ("model_hash", "TEXT"),
    ("tool", "TEXT NOT NULL DEFAULT 'Unknown'"),
    ("width", "INTEGER"),
    ("height", "INTEGER"),
    ("raw", "BLOB"),
    ("params", "TEXT NOT NULL DEFAULT '{}'"),
    ("prompt_node", "TEXT"),
    ("negative_node", "TEXT"),
];

/* ─── connection bootstrap ────────────────────────────────────────── */

/// Open (or create) the index with full-text search enabled.
pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Database> {
    open_with(db_path, &IndexOptions::default())
}

pub fn open_with<P: AsRef<Path>>(db_path: P, opts: &IndexOptions) -> Result<Database> {
    let db_path_ref = db_path.as_ref();
    let mut conn = Connection::open(db_path_ref)
        .with_context(|| format!("failed to open DB at {}", db_path_ref.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Wait up to 30 s for a competing writer before giving up
    conn.busy_timeout(std::time::Duration::from_secs(30))?;

    ensure_schema(&mut conn)?;
    let full_text = if opts.full_text {
        ensure_fts(&conn)
    } else {
        disable_fts(&conn)?;
        false
    };
    debug!(path = %db_path_ref.display(), full_text, "index opened");

    Ok(Database::new(conn, full_text))
}

/* ─── schema ──────────────────────────────────────────────────────── */

/// Idempotent: safe to run on every start, against any older layout.
pub(crate) fn ensure_schema(conn: &mut Connection) -> Result<()> {
    // Grab the write-lock up-front so two processes don't race the ALTERs
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(BASE_SQL)
        .context("could not create base tables")?;

    let existing = table_columns(&tx, "images")?;
    for (name, decl) in ADDITIVE_COLUMNS {
        if existing.contains(*name) {
            continue;
        }
        info!(column = name, "adding column to images");
        tx.execute_batch(&format!("ALTER TABLE images ADD COLUMN {name} {decl}"))
            .with_context(|| format!("could not add column {name}"))?;
    }

    tx.execute_batch(INDEXES_SQL)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let cols = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(cols)
}

/// Create the trigram FTS table and its triggers. Returns `false` (and
/// leaves no triggers behind) when the engine is unavailable.
fn ensure_fts(conn: &Connection) -> bool {
    match try_ensure_fts(conn) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "full-text index unavailable, using substring search");
            if let Err(e) = disable_fts(conn) {
                warn!(error = %e, "could not clean up full-text triggers");
            }
            false
        }
    }
}

fn try_ensure_fts(conn: &Connection) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'images_fts'",
            [],
            |r| r.get(0),
        )
        .optional()?;

    let fresh = match existing {
        Some(sql) if sql.contains("trigram") => false,
        Some(_) => {
            info!("replacing full-text index with trigram tokenizer");
            conn.execute_batch(FTS_DROP_SQL)?;
            true
        }
        None => true,
    };

    conn.execute_batch(FTS_SQL)
        .context("could not create full-text index")?;

    if fresh {
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?;
        if rows > 0 {
            info!(rows, "rebuilding full-text index");
            conn.execute("INSERT INTO images_fts(images_fts) VALUES ('rebuild')", [])?;
        }
    }
    Ok(())
}

/// Drop the FTS table and triggers so writes don't maintain a stale index;
/// re-enabling later recreates and rebuilds it.
fn disable_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(FTS_DROP_SQL)?;
    Ok(())
}

/* ─── maintenance ─────────────────────────────────────────────────── */

/// Outcome of [`normalize_stored_paths`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PathCleanup {
    /// Duplicate rows removed because another row already owns the path.
    pub deleted: usize,
    /// Rows whose stored path was rewritten to its normalized form.
    pub normalized: usize,
}

/// Collapse rows stored under non-normalized paths (back-slashes, doubled
/// separators) so every normalized path owns exactly one row. When several
/// rows normalize to the same path, the one already stored in normalized
/// form is kept, else the oldest.
pub fn normalize_stored_paths(db: &mut Database) -> Result<PathCleanup> {
    let tx = db.conn_mut().transaction()?;
    let rows: Vec<(i64, String)> = {
        let mut stmt = tx.prepare("SELECT id, path FROM images ORDER BY id")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.collect::<std::result::Result<_, _>>()?
    };

    let mut owner: HashMap<String, i64> = rows
        .iter()
        .filter(|(_, p)| normalize_path(p) == *p)
        .map(|(id, p)| (p.clone(), *id))
        .collect();

    let mut out = PathCleanup::default();
    for (id, path) in rows {
        let norm = normalize_path(&path);
        if norm == path {
            continue;
        }
        if owner.contains_key(&norm) {
            tx.execute("DELETE FROM images WHERE id = ?1", [id])?;
            out.deleted += 1;
        } else {
            tx.execute(
                "UPDATE images SET path = ?1, file_name = ?2, folder = ?3 WHERE id = ?4",
                params![norm, file_name_of(&norm), folder_of(&norm), id],
            )?;
            owner.insert(norm, id);
            out.normalized += 1;
        }
    }
    tx.commit()?;

    if out.deleted + out.normalized > 0 {
        info!(deleted = out.deleted, normalized = out.normalized, "stored paths normalized");
    }
    Ok(out)
}

/// Escape `%`, `_` and `\` for a `LIKE … ESCAPE '\'` pattern.
pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/* ─── tests ───────────────────────────────────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_in_memory() {
        let db = open(":memory:").expect("schema applies");
        assert!(db.full_text());
    }

    #[test]
    fn escape_like_specials() {
        assert_eq!(escape_like(r"50%_off\x"), r"50\%\_off\\x");
    }
}
