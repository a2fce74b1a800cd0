//! `Database` – the connection wrapper every caller goes through.
//!
//! Writes replace whole rows: the image row is upserted on its normalized
//! path and its LoRA rows are rewritten in the same transaction. The FTS
//! index follows through triggers.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info};

use crate::model::{ImageRecord, ImageSummary, LoraRef, SourceTool};
use crate::utils::{file_name_of, folder_of, normalize_path};

/// How the index is opened.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Maintain the trigram FTS table. When `false` (or when SQLite lacks
    /// FTS5) keyword search falls back to substring matching only.
    pub full_text: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { full_text: true }
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO images (
        path, file_name, folder, prompt, negative_prompt, seed, steps,
        sampler, scheduler, cfg_scale, model_name, model_hash, tool,
        width, height, file_size, raw, mtime, params, prompt_node, negative_node
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20, ?21)
    ON CONFLICT(path) DO UPDATE SET
        file_name       = excluded.file_name,
        folder          = excluded.folder,
        prompt          = excluded.prompt,
        negative_prompt = excluded.negative_prompt,
        seed            = excluded.seed,
        steps           = excluded.steps,
        sampler         = excluded.sampler,
        scheduler       = excluded.scheduler,
        cfg_scale       = excluded.cfg_scale,
        model_name      = excluded.model_name,
        model_hash      = excluded.model_hash,
        tool            = excluded.tool,
        width           = excluded.width,
        height          = excluded.height,
        file_size       = excluded.file_size,
        raw             = excluded.raw,
        mtime           = excluded.mtime,
        params          = excluded.params,
        prompt_node     = excluded.prompt_node,
        negative_node   = excluded.negative_node
    RETURNING id
"#;

pub(crate) const RECORD_COLUMNS: &str = "id, path, file_name, folder, prompt, negative_prompt, \
     seed, steps, sampler, scheduler, cfg_scale, model_name, model_hash, tool, width, height, \
     file_size, raw, mtime, params, prompt_node, negative_node";

/// Database wrapper for the image index
pub struct Database {
    conn: Connection,
    full_text: bool,
}

impl Database {
    pub(crate) fn new(conn: Connection, full_text: bool) -> Self {
        Self { conn, full_text }
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// `true` when keyword search is backed by the FTS index.
    pub fn full_text(&self) -> bool {
        self.full_text
    }

    /* ─── writes ──────────────────────────────────────────────────── */

    /// Insert or fully replace one record.
    pub fn upsert(&mut self, rec: &ImageRecord) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(rec)).map(|_| ())
    }

    /// Insert or fully replace every record in one transaction. Either the
    /// whole batch lands or none of it does.
    pub fn upsert_batch(&mut self, recs: &[ImageRecord]) -> Result<usize> {
        if recs.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        for rec in recs {
            write_record(&tx, rec).with_context(|| format!("upsert {}", rec.path))?;
        }
        tx.commit()?;
        debug!(count = recs.len(), "batch committed");
        Ok(recs.len())
    }

    /// Delete rows by path. LoRA rows go with them (`ON DELETE CASCADE`).
    pub fn delete(&mut self, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut removed = 0usize;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM images WHERE path = ?1")?;
            for p in paths {
                removed += stmt.execute([normalize_path(p)])?;
            }
        }
        tx.commit()?;
        if removed > 0 {
            info!(removed, "rows deleted");
        }
        Ok(removed)
    }

    /// Move a row to a new path, keeping its metadata. A row already stored
    /// under `new` is replaced. Returns `false` when `old` is not indexed;
    /// paths that normalize equal leave the row untouched.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<bool> {
        let old = normalize_path(old);
        let new = normalize_path(new);
        if old == new {
            return Ok(self.get(&old)?.is_some());
        }
        let tx = self.conn.transaction()?;
        let id: Option<i64> = tx
            .query_row("SELECT id FROM images WHERE path = ?1", [&old], |r| r.get(0))
            .optional()?;
        let Some(id) = id else {
            return Ok(false);
        };
        tx.execute("DELETE FROM images WHERE path = ?1", [&new])?;
        tx.execute(
            "UPDATE images SET path = ?1, file_name = ?2, folder = ?3 WHERE id = ?4",
            params![new, file_name_of(&new), folder_of(&new), id],
        )?;
        tx.commit()?;
        debug!(from = %old, to = %new, "row renamed");
        Ok(true)
    }

    /* ─── reads ───────────────────────────────────────────────────── */

    pub fn get(&self, path: &str) -> Result<Option<ImageRecord>> {
        let path = normalize_path(path);
        let sql = format!("SELECT {RECORD_COLUMNS} FROM images WHERE path = ?1");
        let found = self
            .conn
            .query_row(&sql, [&path], |r| Ok((r.get::<_, i64>(0)?, read_record(r)?)))
            .optional()?;
        let Some((id, mut rec)) = found else {
            return Ok(None);
        };
        rec.loras = self.loras_of(id)?;
        Ok(Some(rec))
    }

    fn loras_of(&self, image_id: i64) -> Result<Vec<LoraRef>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT lora_name, weight FROM image_loras WHERE image_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([image_id], |r| Ok(LoraRef::new(r.get::<_, String>(0)?, r.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Lightweight rows for `paths`, in the same order; unknown paths are
    /// skipped.
    pub fn summaries(&self, paths: &[String]) -> Result<Vec<ImageSummary>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, file_name, IFNULL(width, 0), IFNULL(height, 0), mtime
               FROM images WHERE path = ?1",
        )?;
        let mut out = Vec::with_capacity(paths.len());
        for p in paths {
            let row = stmt
                .query_row([normalize_path(p)], |r| {
                    Ok(ImageSummary {
                        path: r.get(0)?,
                        file_name: r.get(1)?,
                        width: r.get(2)?,
                        height: r.get(3)?,
                        mtime: r.get(4)?,
                    })
                })
                .optional()?;
            out.extend(row);
        }
        Ok(out)
    }

    /// Every indexed path.
    pub fn known_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM images ORDER BY path")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Distinct parent folders of indexed files.
    pub fn folders(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT folder FROM images WHERE folder != '' ORDER BY folder")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?)
    }
}

fn write_record(tx: &Transaction<'_>, rec: &ImageRecord) -> Result<()> {
    let path = normalize_path(&rec.path);
    let file_name = if rec.file_name.is_empty() {
        file_name_of(&path)
    } else {
        rec.file_name.clone()
    };
    let params_json = serde_json::to_string(&rec.params)?;

    let id: i64 = tx.prepare_cached(UPSERT_SQL)?.query_row(
        params![
            path,
            file_name,
            folder_of(&path),
            rec.prompt,
            rec.negative_prompt,
            rec.seed,
            rec.steps,
            rec.sampler,
            rec.scheduler,
            rec.cfg_scale,
            rec.model_name,
            rec.model_hash,
            rec.tool.as_str(),
            rec.width,
            rec.height,
            rec.file_size as i64,
            rec.raw,
            rec.mtime,
            params_json,
            rec.prompt_node,
            rec.negative_node,
        ],
        |r| r.get(0),
    )?;

    tx.prepare_cached("DELETE FROM image_loras WHERE image_id = ?1")?
        .execute([id])?;
    let mut ins = tx.prepare_cached(
        "INSERT INTO image_loras(image_id, lora_name, weight) VALUES (?1, ?2, ?3)",
    )?;
    for lora in &rec.loras {
        ins.execute(params![id, lora.name, lora.weight])?;
    }
    Ok(())
}

/// Map a row selected with [`RECORD_COLUMNS`]; LoRAs are filled separately.
pub(crate) fn read_record(r: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    let tool: String = r.get(13)?;
    let params: String = r.get(19)?;
    let raw: Option<Vec<u8>> = r.get(17)?;
    let file_size: i64 = r.get(16)?;
    Ok(ImageRecord {
        path: r.get(1)?,
        file_name: r.get(2)?,
        folder: r.get(3)?,
        prompt: r.get(4)?,
        negative_prompt: r.get(5)?,
        seed: r.get(6)?,
        steps: r.get(7)?,
        sampler: r.get(8)?,
        scheduler: r.get(9)?,
        cfg_scale: r.get(10)?,
        model_name: r.get(11)?,
        model_hash: r.get(12)?,
        tool: tool.parse().unwrap_or(SourceTool::Unknown),
        width: r.get(14)?,
        height: r.get(15)?,
        file_size: file_size.max(0) as u64,
        raw: raw.unwrap_or_default(),
        mtime: r.get(18)?,
        loras: Vec::new(),
        params: serde_json::from_str::<BTreeMap<String, String>>(&params).unwrap_or_default(),
        prompt_node: r.get(20)?,
        negative_node: r.get(21)?,
    })
}
