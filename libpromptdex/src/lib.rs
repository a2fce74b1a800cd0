//! libpromptdex – public API surface for the promptdex core.
//!
//! Down-stream crates (`cli-bin`, an HTTP layer, tests) should go through
//! [`Library`] and the records re-exported here rather than reach into the
//! internal modules. The modules stay public for tools that need finer
//! control (a custom scanner schedule, a standalone extractor run).

pub mod config;
pub mod db;
pub mod extract;
pub mod logging;
pub mod model;
pub mod scan;
pub mod thumbs;
pub mod utils;
pub mod watcher;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod logging_tests;
#[cfg(test)]
mod scan_tests;
#[cfg(test)]
mod utils_tests;
#[cfg(test)]
mod watcher_tests;

pub use config::Config;
pub use db::{Database, FacetScope, Facets, IndexOptions, SearchPage, SearchQuery, SortOrder};
pub use extract::ExtractOptions;
pub use model::{FacetCount, ImageRecord, ImageSummary, LoraRef, SourceTool};
pub use scan::{ScanReport, Scanner};
pub use thumbs::ThumbnailCache;
pub use watcher::{FileWatcher, WatcherConfig, WatcherState};

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::utils::{normalize_path, to_db_path};

/// One materialized result page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Matches across all pages, including files since deleted on disk.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
    pub items: Vec<ImageSummary>,
}

/// Primary façade – open an index then call helper methods.
pub struct Library {
    cfg: Config,
    db: Database,
    scanner: Scanner,
    thumbs: ThumbnailCache,
    opts: ExtractOptions,
}

impl Library {
    /// Load configuration from env / workspace and open (or create) the DB.
    pub fn open_default() -> Result<Self> {
        Self::open_with(Config::load()?)
    }

    /// Open an explicit DB path – handy for tests or headless tools.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(Config::with_db_path(path))
    }

    pub fn open_with(cfg: Config) -> Result<Self> {
        Self::open_with_options(cfg, ExtractOptions::default())
    }

    /// Like [`Library::open_with`] with a custom model-name policy.
    pub fn open_with_options(cfg: Config, opts: ExtractOptions) -> Result<Self> {
        let db = db::open_with(
            &cfg.db_path,
            &IndexOptions {
                full_text: cfg.full_text,
            },
        )?;
        let thumbs = ThumbnailCache::new(&cfg.cache_dir);
        let scanner = Scanner::with_options(cfg.clone(), opts.clone());
        info!(db = %cfg.db_path.display(), full_text = db.full_text(), "library opened");
        Ok(Self {
            cfg,
            db,
            scanner,
            thumbs,
            opts,
        })
    }

    /// Run one scan cycle; returns the number of newly indexed files.
    pub fn scan<P: AsRef<Path>>(&mut self, roots: &[P]) -> Result<usize> {
        Ok(self.scan_report(roots)?.indexed)
    }

    pub fn scan_report<P: AsRef<Path>>(&mut self, roots: &[P]) -> Result<ScanReport> {
        let report = self.scanner.scan_report(roots)?;
        for p in &report.removed_paths {
            self.thumbs.purge(p);
        }
        Ok(report)
    }

    /// Every matching path in query order.
    pub fn search(&self, q: &SearchQuery) -> Result<Vec<String>> {
        self.db.search(q)
    }

    /// One page (1-based) of summaries. Files that vanished since the last
    /// scan are left out here and removed by the next scan.
    pub fn page(&self, q: &SearchQuery, page: usize, page_size: usize) -> Result<Page> {
        let hits = self.db.search_page(q, page, page_size)?;
        let present: Vec<String> = hits
            .paths
            .into_iter()
            .filter(|p| {
                let ok = Path::new(p).exists();
                if !ok {
                    debug!(path = %p, "skipping missing file");
                }
                ok
            })
            .collect();
        Ok(Page {
            total: hits.total,
            page: hits.page,
            page_size: hits.page_size,
            has_more: hits.has_more,
            items: self.db.summaries(&present)?,
        })
    }

    /// Full record for `path`. A file the index hasn't seen yet is parsed
    /// on the spot and stored; `None` when it is neither indexed nor on disk.
    pub fn metadata(&mut self, path: &str) -> Result<Option<ImageRecord>> {
        let norm = normalize_path(path);
        if let Some(rec) = self.db.get(&norm)? {
            return Ok(Some(rec));
        }
        if !Path::new(&norm).is_file() {
            return Ok(None);
        }
        let rec = extract::extract_with(&norm, &self.opts);
        self.db.upsert(&rec)?;
        debug!(path = %rec.path, "indexed on demand");
        Ok(Some(rec))
    }

    /// Drop rows (and cached thumbnails) for `paths`. Files on disk are not
    /// touched; a later scan re-indexes any that still exist.
    pub fn delete(&mut self, paths: &[String]) -> Result<usize> {
        let removed = self.db.delete(paths)?;
        for p in paths {
            self.thumbs.purge(p);
        }
        Ok(removed)
    }

    pub fn facets(&self, scope: &FacetScope) -> Result<Facets> {
        self.db.facets(scope)
    }

    /// Rewrite legacy rows stored under non-normalized paths.
    pub fn normalize_paths(&mut self) -> Result<db::PathCleanup> {
        db::normalize_stored_paths(&mut self.db)
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbs
    }

    /// Start a watcher on `root` that writes through its own connection.
    pub fn watch<P: AsRef<Path>>(
        &self,
        root: P,
        config: Option<WatcherConfig>,
    ) -> Result<FileWatcher> {
        let root = root.as_ref().to_path_buf();
        let conn = db::open_with(
            &self.cfg.db_path,
            &IndexOptions {
                full_text: self.cfg.full_text,
            },
        )?;
        let mut watcher = FileWatcher::new(vec![root.clone()], config.unwrap_or_default())?;
        watcher
            .with_database(conn)?
            .with_thumbnails(self.thumbs.clone())?
            .with_extract_options(self.opts.clone())?;
        watcher.start()?;
        info!(root = %to_db_path(&root), "watch started");
        Ok(watcher)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }
}
