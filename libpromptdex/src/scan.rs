// libpromptdex/src/scan.rs
//
// One scan cycle reconciles the filesystem against the index:
//
//   roots ─► walk ─► diff ─► delete missing ─► worker pool ─► batched upsert
//
// Only one cycle runs at a time. A request arriving mid-scan is answered
// with an empty report straight away instead of being queued.

use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;

use anyhow::Result;
use crossbeam_channel::bounded;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::{self, Database, IndexOptions};
use crate::extract::{try_extract, ExtractOptions};
use crate::model::ImageRecord;
use crate::utils::{is_database_artifact, is_image_path, normalize_path, to_db_path};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Files extracted and committed.
    pub indexed: usize,
    /// Rows dropped because their file is gone.
    pub removed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_paths: Vec<String>,
    /// New files that could not be read (vanished, unreadable, parser panic).
    pub failed_files: usize,
    /// Batches whose transaction was rolled back.
    pub failed_batches: usize,
    /// Another cycle was already running; nothing was done.
    pub skipped_busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    Scanning,
}

/// Resets the state to `Idle` when dropped, unwinding included.
pub(crate) struct ScanGuard<'a> {
    state: &'a Mutex<ScanState>,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ScanState::Idle;
    }
}

pub struct Scanner {
    cfg: Config,
    opts: ExtractOptions,
    state: Mutex<ScanState>,
}

impl Scanner {
    pub fn new(cfg: Config) -> Self {
        Self::with_options(cfg, ExtractOptions::default())
    }

    pub fn with_options(cfg: Config, opts: ExtractOptions) -> Self {
        Self {
            cfg,
            opts,
            state: Mutex::new(ScanState::Idle),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn is_scanning(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == ScanState::Scanning
    }

    pub(crate) fn try_begin(&self) -> Option<ScanGuard<'_>> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *st == ScanState::Scanning {
            return None;
        }
        *st = ScanState::Scanning;
        Some(ScanGuard { state: &self.state })
    }

    /// Run one cycle and return how many new files were indexed.
    pub fn scan<P: AsRef<Path>>(&self, extra_roots: &[P]) -> Result<usize> {
        Ok(self.scan_report(extra_roots)?.indexed)
    }

    /// Run one cycle over the configured roots, every folder already in the
    /// index and `extra_roots`.
    pub fn scan_report<P: AsRef<Path>>(&self, extra_roots: &[P]) -> Result<ScanReport> {
        let Some(_guard) = self.try_begin() else {
            info!("scan already in progress, request dropped");
            return Ok(ScanReport {
                skipped_busy: true,
                ..Default::default()
            });
        };

        // Each cycle gets its own connection; WAL keeps readers unblocked.
        let mut db = db::open_with(
            &self.cfg.db_path,
            &IndexOptions {
                full_text: self.cfg.full_text,
            },
        )?;
        self.run(&mut db, extra_roots)
    }

    fn run<P: AsRef<Path>>(&self, db: &mut Database, extra_roots: &[P]) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        let mut candidates: Vec<PathBuf> = self.cfg.roots.clone();
        candidates.extend(db.folders()?.into_iter().map(PathBuf::from));
        candidates.extend(extra_roots.iter().map(|p| p.as_ref().to_path_buf()));
        let roots = scan_roots(&candidates, self.cfg.recursive);
        debug!(roots = roots.len(), recursive = self.cfg.recursive, "scan roots");

        let mut found = BTreeSet::new();
        for root in &roots {
            found.extend(walk_images(Path::new(root), self.cfg.recursive));
        }

        let known = db.known_paths()?;
        let known_norm: HashSet<String> = known.iter().map(|p| normalize_path(p)).collect();

        let missing: Vec<String> = known
            .into_iter()
            .filter(|p| !Path::new(p).exists())
            .collect();
        if !missing.is_empty() {
            match db.delete(&missing) {
                Ok(n) => {
                    report.removed = n;
                    report.removed_paths = missing;
                }
                Err(e) => error!(error = %e, "could not remove missing files"),
            }
        }

        let new_files: Vec<String> = found
            .into_iter()
            .filter(|p| !known_norm.contains(p))
            .collect();
        if new_files.is_empty() {
            debug!(removed = report.removed, "no new files");
            return Ok(report);
        }

        info!(new = new_files.len(), "new images found, extracting");
        self.index(db, new_files, &mut report);
        info!(
            indexed = report.indexed,
            removed = report.removed,
            failed_files = report.failed_files,
            failed_batches = report.failed_batches,
            "scan complete"
        );
        Ok(report)
    }

    /// Fan extraction out to the worker pool and flush results in batches
    /// as they arrive.
    fn index(&self, db: &mut Database, new_files: Vec<String>, report: &mut ScanReport) {
        let workers = self.cfg.workers.max(1);
        let batch_size = self.cfg.batch_size.max(1);
        let total = new_files.len();
        let opts = &self.opts;

        let (job_tx, job_rx) = bounded::<String>(workers * 2);
        let (out_tx, out_rx) = bounded::<Option<ImageRecord>>(workers * 2);

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                s.spawn(move || {
                    for path in job_rx {
                        let rec = extract_one(&path, opts);
                        if out_tx.send(rec).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(out_tx);

            s.spawn(move || {
                for path in new_files {
                    if job_tx.send(path).is_err() {
                        break;
                    }
                }
            });

            let mut batch: Vec<ImageRecord> = Vec::with_capacity(batch_size);
            for rec in out_rx {
                match rec {
                    Some(rec) => batch.push(rec),
                    None => report.failed_files += 1,
                }
                if batch.len() >= batch_size {
                    flush(db, &mut batch, report);
                    info!(indexed = report.indexed, total, "indexing");
                }
            }
            flush(db, &mut batch, report);
        });
    }
}

fn extract_one(path: &str, opts: &ExtractOptions) -> Option<ImageRecord> {
    match panic::catch_unwind(AssertUnwindSafe(|| try_extract(path, opts))) {
        Ok(Ok(rec)) => Some(rec),
        Ok(Err(e)) => {
            warn!(file = %path, error = %e, "skipping unreadable file");
            None
        }
        Err(_) => {
            warn!(file = %path, "extractor panicked, skipping");
            None
        }
    }
}

/// Commit `batch` in one transaction. A failure rolls back only this batch.
fn flush(db: &mut Database, batch: &mut Vec<ImageRecord>, report: &mut ScanReport) {
    if batch.is_empty() {
        return;
    }
    match db.upsert_batch(batch) {
        Ok(n) => report.indexed += n,
        Err(e) => {
            error!(size = batch.len(), error = %e, "batch rolled back");
            report.failed_batches += 1;
        }
    }
    batch.clear();
}

/// Normalize and dedupe candidate roots, dropping those that don't exist.
/// In recursive mode a root nested under another root is pruned.
pub fn scan_roots(candidates: &[PathBuf], recursive: bool) -> Vec<String> {
    let set: BTreeSet<String> = candidates
        .iter()
        .filter(|p| p.is_dir())
        .map(to_db_path)
        .collect();

    if !recursive {
        return set.into_iter().collect();
    }
    let mut kept: Vec<String> = Vec::new();
    for root in set {
        if !kept.iter().any(|parent| is_under(&root, parent)) {
            kept.push(root);
        }
    }
    kept
}

fn is_under(child: &str, parent: &str) -> bool {
    if parent.ends_with('/') {
        child.len() > parent.len() && child.starts_with(parent)
    } else {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Image files under `root` (depth 1 unless `recursive`), normalized.
fn walk_images(root: &Path, recursive: bool) -> Vec<String> {
    let depth = if recursive { usize::MAX } else { 1 };
    WalkDir::new(root)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                debug!(error = %err, "walk error");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image_path(p) && !is_database_artifact(p))
        .map(to_db_path)
        .collect()
}
