//! Filtered, sorted, paginated search and facet counts.
//!
//! Keyword matching is the same case-insensitive `LIKE` substring predicate
//! in both modes. With FTS available the trigram index narrows candidates
//! first; it never decides a match on its own, so results are identical.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use rusqlite::{params_from_iter, types::Value};
use serde::{Deserialize, Serialize};

use super::{escape_like, Database};
use crate::model::FacetCount;
use crate::utils::normalize_path;

/// Sentinel the caller uses for "no model/LoRA filter".
pub const ALL: &str = "ALL";

/// Trigram index can't help below this many characters.
const MIN_FTS_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    TimeDesc,
    TimeAsc,
    NameAsc,
    NameDesc,
}

impl SortOrder {
    fn order_by(&self) -> &'static str {
        match self {
            Self::TimeDesc => "mtime DESC, path ASC",
            Self::TimeAsc => "mtime ASC, path ASC",
            Self::NameAsc => "file_name COLLATE NOCASE ASC, path ASC",
            Self::NameDesc => "file_name COLLATE NOCASE DESC, path ASC",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeDesc => "time_desc",
            Self::TimeAsc => "time_asc",
            Self::NameAsc => "name_asc",
            Self::NameDesc => "name_desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "time_desc" => Self::TimeDesc,
            "time_asc" => Self::TimeAsc,
            "name_asc" => Self::NameAsc,
            "name_desc" => Self::NameDesc,
            other => bail!("unknown sort order `{other}`"),
        })
    }
}

/// Search filters. Empty strings and `"ALL"` mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
    /// Matches this folder and everything below it.
    pub folder: Option<String>,
    pub model: Option<String>,
    pub lora: Option<String>,
    pub sort: SortOrder,
}

impl SearchQuery {
    pub fn keyword(kw: impl Into<String>) -> Self {
        Self {
            keyword: Some(kw.into()),
            ..Default::default()
        }
    }
}

/// One page of results plus the overall match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub total: usize,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub paths: Vec<String>,
    pub has_more: bool,
}

/// Cascading facet scope. The models facet ignores `model`, the folders
/// facet ignores `folder`; every other facet honours both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetScope {
    pub folder: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facets {
    pub folders: Vec<FacetCount>,
    pub models: Vec<FacetCount>,
    pub loras: Vec<FacetCount>,
    pub resolutions: Vec<FacetCount>,
    pub samplers: Vec<FacetCount>,
    pub schedulers: Vec<FacetCount>,
}

/// Accumulates `AND`-ed predicates and their bound values.
#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    args: Vec<Value>,
}

impl Filter {
    fn push(&mut self, clause: &str, args: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.to_string());
        self.args.extend(args);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn folder(&mut self, folder: Option<&str>) {
        let Some(folder) = active(folder) else { return };
        let folder = normalize_path(folder);
        if folder == "/" {
            self.push("folder LIKE '/%'", []);
            return;
        }
        let prefix = format!("{}/%", escape_like(&folder));
        self.push(
            "(folder = ? OR folder LIKE ? ESCAPE '\\')",
            [Value::Text(folder), Value::Text(prefix)],
        );
    }

    fn model(&mut self, model: Option<&str>) {
        if let Some(m) = active(model) {
            self.push("model_name = ?", [Value::Text(m.to_string())]);
        }
    }

    fn lora(&mut self, lora: Option<&str>) {
        if let Some(l) = active(lora) {
            self.push(
                "EXISTS (SELECT 1 FROM image_loras il WHERE il.image_id = images.id AND il.lora_name = ?)",
                [Value::Text(l.to_string())],
            );
        }
    }

    fn keyword(&mut self, keyword: Option<&str>, full_text: bool) {
        let Some(kw) = keyword.map(str::trim).filter(|k| !k.is_empty()) else {
            return;
        };
        if full_text && kw.chars().count() >= MIN_FTS_CHARS {
            let phrase = format!("\"{}\"", kw.replace('"', "\"\""));
            self.push(
                "id IN (SELECT rowid FROM images_fts WHERE images_fts MATCH ?)",
                [Value::Text(phrase)],
            );
        }
        let pattern = format!("%{}%", escape_like(kw));
        self.push(
            "(prompt LIKE ? ESCAPE '\\' OR file_name LIKE ? ESCAPE '\\')",
            [Value::Text(pattern.clone()), Value::Text(pattern)],
        );
    }
}

fn active(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty() && *s != ALL)
}

impl Database {
    fn filter_for(&self, q: &SearchQuery) -> Filter {
        let mut f = Filter::default();
        f.keyword(q.keyword.as_deref(), self.full_text());
        f.folder(q.folder.as_deref());
        f.model(q.model.as_deref());
        f.lora(q.lora.as_deref());
        f
    }

    /// Every matching path, in `q.sort` order.
    pub fn search(&self, q: &SearchQuery) -> Result<Vec<String>> {
        let f = self.filter_for(q);
        let sql = format!(
            "SELECT path FROM images {} ORDER BY {}",
            f.where_sql(),
            q.sort.order_by()
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(f.args.iter()), |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// One page (1-based) of matches plus the total. Ties on the sort key
    /// are broken by path, so consecutive pages never overlap.
    pub fn search_page(&self, q: &SearchQuery, page: usize, page_size: usize) -> Result<SearchPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let f = self.filter_for(q);
        let where_sql = f.where_sql();

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM images {where_sql}"),
            params_from_iter(f.args.iter()),
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT path FROM images {where_sql} ORDER BY {} LIMIT ? OFFSET ?",
            q.sort.order_by()
        );
        let total = total.max(0) as usize;
        // an offset that overflows lies past the last row
        let offset = (page - 1)
            .checked_mul(page_size)
            .filter(|&o| o < total);
        let Some(offset) = offset else {
            return Ok(SearchPage {
                total,
                page,
                page_size,
                has_more: false,
                paths: Vec::new(),
            });
        };

        let mut args = f.args.clone();
        args.push(Value::Integer(i64::try_from(page_size).unwrap_or(i64::MAX)));
        args.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let mut stmt = self.conn().prepare(&sql)?;
        let paths = stmt
            .query_map(params_from_iter(args.iter()), |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SearchPage {
            total,
            page,
            page_size,
            has_more: offset.saturating_add(page_size) < total,
            paths,
        })
    }

    /* ─── facets ──────────────────────────────────────────────────── */

    pub fn facets(&self, scope: &FacetScope) -> Result<Facets> {
        Ok(Facets {
            folders: self.folder_facet(scope)?,
            models: self.model_facet(scope)?,
            loras: self.lora_facet(scope)?,
            resolutions: self.resolution_facet(scope)?,
            samplers: self.column_facet("sampler", scope)?,
            schedulers: self.column_facet("scheduler", scope)?,
        })
    }

    pub fn folder_facet(&self, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        let mut f = Filter::default();
        f.model(scope.model.as_deref());
        f.push("folder != ''", []);
        self.counted("folder", "images", f)
    }

    pub fn model_facet(&self, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        let mut f = Filter::default();
        f.folder(scope.folder.as_deref());
        f.push("model_name IS NOT NULL AND model_name != ''", []);
        self.counted("model_name", "images", f)
    }

    /// LoRAs co-occurring with the scoped model/folder.
    pub fn lora_facet(&self, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        let mut f = Filter::default();
        f.folder(scope.folder.as_deref());
        f.model(scope.model.as_deref());
        self.counted(
            "il.lora_name",
            "image_loras il JOIN images ON images.id = il.image_id",
            f,
        )
    }

    pub fn resolution_facet(&self, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        let mut f = self.scoped(scope);
        f.push("width IS NOT NULL AND height IS NOT NULL", []);
        self.counted("width || 'x' || height", "images", f)
    }

    pub fn sampler_facet(&self, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        self.column_facet("sampler", scope)
    }

    pub fn scheduler_facet(&self, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        self.column_facet("scheduler", scope)
    }

    fn column_facet(&self, column: &str, scope: &FacetScope) -> Result<Vec<FacetCount>> {
        let mut f = self.scoped(scope);
        f.push(&format!("{column} IS NOT NULL AND {column} != ''"), []);
        self.counted(column, "images", f)
    }

    fn scoped(&self, scope: &FacetScope) -> Filter {
        let mut f = Filter::default();
        f.folder(scope.folder.as_deref());
        f.model(scope.model.as_deref());
        f
    }

    fn counted(&self, expr: &str, from: &str, f: Filter) -> Result<Vec<FacetCount>> {
        let sql = format!(
            "SELECT {expr} AS value, COUNT(*) AS n FROM {from} {}
              GROUP BY value ORDER BY n DESC, value ASC",
            f.where_sql()
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(f.args.iter()), |r| {
            Ok(FacetCount {
                value: r.get(0)?,
                count: r.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
