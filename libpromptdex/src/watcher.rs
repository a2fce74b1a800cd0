//! Live index updates between scans.
//!
//! Monitors the roots with `notify`, coalesces bursts of events per path
//! and applies them to the index: a written image is extracted and
//! upserted, a removed one is deleted, a renamed one keeps its row under
//! the new path. A small state machine lets the watcher be paused, resumed
//! and shut down cleanly.

use crate::db::Database;
use crate::extract::{try_extract, ExtractOptions};
use crate::model::ImageRecord;
use crate::thumbs::ThumbnailCache;
use crate::utils::{is_database_artifact, is_image_path, to_db_path};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use notify::{
    event::{ModifyKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ────── configuration ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    /// Max raw events drained per tick.
    pub batch_size: usize,
    pub max_queue_size: usize,
    /// Extra attempts for a file that is still being written.
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            batch_size: 1_000,
            max_queue_size: 100_000,
            retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

// ────── public state/useful telemetry ────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Initializing,
    Watching,
    Paused,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WatcherStatus {
    pub state: WatcherState,
    pub events_processed: usize,
    pub queue_size: usize,
    pub start_time: Option<Instant>,
    pub watched_paths: Vec<PathBuf>,
}

// ────── internal bookkeeping ─────────────────────────────────────────────────

/// What the index should do for one path. Ordered by how changes are
/// applied within a flush: renames first, then deletes, then upserts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Change {
    Rename { to: PathBuf },
    Remove,
    Upsert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingChange {
    path: PathBuf,
    change: Change,
}

impl PendingChange {
    fn new(path: PathBuf, change: Change) -> Self {
        Self { path, change }
    }
}

/// Latest change per path wins; the window restarts on every flush.
struct EventDebouncer {
    events: HashMap<PathBuf, PendingChange>,
    debounce_window_ms: u64,
    last_flush: Instant,
}

impl EventDebouncer {
    fn new(debounce_window_ms: u64) -> Self {
        Self {
            events: HashMap::new(),
            debounce_window_ms,
            last_flush: Instant::now(),
        }
    }

    fn add_event(&mut self, event: PendingChange) {
        self.events.insert(event.path.clone(), event);
    }

    fn is_ready_to_flush(&self) -> bool {
        self.last_flush.elapsed() >= Duration::from_millis(self.debounce_window_ms)
    }

    fn flush(&mut self) -> Vec<PendingChange> {
        let mut v: Vec<_> = self.events.drain().map(|(_, e)| e).collect();
        v.sort_by(|a, b| {
            a.change
                .cmp(&b.change)
                .then_with(|| a.path.cmp(&b.path))
        });
        self.last_flush = Instant::now();
        v
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

/// Unpaired `From` halves of renames, keyed by notify tracker id. A file
/// moved out of the watched tree never gets its `To`, so stale halves are
/// pruned.
#[derive(Debug, Default)]
struct PendingRenames {
    halves: HashMap<usize, (PathBuf, Instant)>,
}

impl PendingRenames {
    fn insert(&mut self, tracker: usize, from: PathBuf) {
        self.halves.insert(tracker, (from, Instant::now()));
    }

    fn take(&mut self, tracker: usize) -> Option<PathBuf> {
        self.halves.remove(&tracker).map(|(from, _)| from)
    }

    /// Drop halves older than `max_age`; returns how many went.
    fn prune(&mut self, max_age: Duration) -> usize {
        let before = self.halves.len();
        self.halves.retain(|_, (_, seen)| seen.elapsed() < max_age);
        before - self.halves.len()
    }

    fn len(&self) -> usize {
        self.halves.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.halves.is_empty()
    }
}

fn indexable(p: &Path) -> bool {
    is_image_path(p) && !is_database_artifact(p)
}

/// Turn one raw notify event into index changes. `From`/`To` halves of a
/// rename are paired through `renames` by their tracker id.
fn classify(event: Event, renames: &mut PendingRenames) -> Vec<PendingChange> {
    let upserts = |paths: Vec<PathBuf>| -> Vec<PendingChange> {
        paths
            .into_iter()
            .filter(|p| indexable(p))
            .map(|p| PendingChange::new(p, Change::Upsert))
            .collect()
    };

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) => upserts(event.paths),
        EventKind::Modify(ModifyKind::Any) | EventKind::Modify(ModifyKind::Other) => {
            upserts(event.paths)
        }
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .filter(|p| indexable(p))
            .map(|p| PendingChange::new(p, Change::Remove))
            .collect(),

        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both | RenameMode::Any if event.paths.len() >= 2 => {
                let mut it = event.paths.into_iter();
                match (it.next(), it.next()) {
                    (Some(from), Some(to)) => rename(from, to),
                    _ => Vec::new(),
                }
            }
            RenameMode::From => {
                let tracker = event.tracker();
                let Some(from) = event.paths.into_iter().next() else {
                    return Vec::new();
                };
                if let Some(trk) = tracker {
                    renames.insert(trk, from.clone());
                }
                // stands as a delete unless the matching `To` shows up
                if indexable(&from) {
                    vec![PendingChange::new(from, Change::Remove)]
                } else {
                    Vec::new()
                }
            }
            RenameMode::To => {
                let old = event.tracker().and_then(|trk| renames.take(trk));
                let Some(to) = event.paths.into_iter().next() else {
                    return Vec::new();
                };
                match old {
                    Some(from) => rename(from, to),
                    None => upserts(vec![to]),
                }
            }
            // a lone path: the file is either here now or it isn't
            _ => event
                .paths
                .into_iter()
                .filter(|p| indexable(p))
                .map(|p| {
                    let change = if p.exists() { Change::Upsert } else { Change::Remove };
                    PendingChange::new(p, change)
                })
                .collect(),
        },

        _ => Vec::new(),
    }
}

fn rename(from: PathBuf, to: PathBuf) -> Vec<PendingChange> {
    match (indexable(&from), indexable(&to)) {
        (true, true) => vec![PendingChange::new(from, Change::Rename { to })],
        (true, false) => vec![PendingChange::new(from, Change::Remove)],
        (false, true) => vec![PendingChange::new(to, Change::Upsert)],
        (false, false) => Vec::new(),
    }
}

/// Where flushed changes go. Without a database they are only logged.
#[derive(Default)]
struct Sink {
    db: Option<Database>,
    thumbs: Option<ThumbnailCache>,
    opts: ExtractOptions,
}

impl Sink {
    fn apply(&mut self, ev: &PendingChange, cfg: &WatcherConfig) -> Result<()> {
        let Some(db) = self.db.as_mut() else {
            info!(path = %ev.path.display(), change = ?ev.change, "processed");
            return Ok(());
        };
        match &ev.change {
            Change::Upsert => {
                if let Some(rec) = extract_settled(&ev.path, &self.opts, cfg) {
                    db.upsert(&rec)?;
                    debug!(path = %rec.path, "indexed");
                }
            }
            Change::Remove => {
                let n = db.delete(&[to_db_path(&ev.path)])?;
                if let Some(cache) = &self.thumbs {
                    cache.purge(&ev.path);
                }
                debug!(path = %ev.path.display(), removed = n, "removed");
            }
            Change::Rename { to } => {
                let moved = db.rename(&to_db_path(&ev.path), &to_db_path(to))?;
                if let Some(cache) = &self.thumbs {
                    cache.purge(&ev.path);
                }
                if !moved {
                    // never indexed under the old name: index the new one
                    if let Some(rec) = extract_settled(to, &self.opts, cfg) {
                        db.upsert(&rec)?;
                    }
                }
                debug!(from = %ev.path.display(), to = %to.display(), "renamed");
            }
        }
        Ok(())
    }
}

/// Extract `path`, retrying while it looks half-written (empty, or no
/// decodable header). `None` once the file has disappeared.
fn extract_settled(
    path: &Path,
    opts: &ExtractOptions,
    cfg: &WatcherConfig,
) -> Option<ImageRecord> {
    let mut attempt = 0;
    loop {
        let last = attempt >= cfg.retries;
        match try_extract(path, opts) {
            Ok(rec) if rec.file_size > 0 && rec.width.is_some() => return Some(rec),
            Ok(rec) if last => {
                debug!(path = %rec.path, "still incomplete, indexing minimal record");
                return Some(rec);
            }
            Ok(_) => {}
            Err(e) if !path.exists() => {
                debug!(path = %path.display(), error = %e, "gone before indexing");
                return None;
            }
            Err(e) if last => {
                warn!(path = %path.display(), error = %e, "giving up on unreadable file");
                return None;
            }
            Err(_) => {}
        }
        attempt += 1;
        thread::sleep(Duration::from_millis(cfg.retry_backoff_ms * u64::from(attempt)));
    }
}

// ────── main watcher struct ───────────────────────────────────────────────────
pub struct FileWatcher {
    state: Arc<Mutex<WatcherState>>,
    watched_paths: Vec<PathBuf>,
    _event_receiver: Receiver<std::result::Result<Event, notify::Error>>,
    _watcher: RecommendedWatcher,
    processor_thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    events_processed: Arc<AtomicUsize>,
    queue_size: Arc<AtomicUsize>,
    start_time: Instant,
    sink: Arc<Mutex<Sink>>,
}

impl FileWatcher {
    pub fn new(paths: Vec<PathBuf>, config: WatcherConfig) -> Result<Self> {
        // ── basic shared state/channels ───────────────────────────────────────
        let stop_flag = Arc::new(AtomicBool::new(false));
        let events_processed = Arc::new(AtomicUsize::new(0));
        let queue_size = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(Mutex::new(WatcherState::Initializing));
        let sink = Arc::new(Mutex::new(Sink::default()));

        let (tx, rx) = bounded(config.max_queue_size);

        // ── start actual OS watcher ───────────────────────────────────────────
        let event_tx = tx.clone();
        let mut actual_watcher = RecommendedWatcher::new(
            move |ev| {
                let _ = event_tx.try_send(ev);
            },
            notify::Config::default(),
        )?;

        for p in &paths {
            actual_watcher
                .watch(p, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path {}", p.display()))?;
        }

        // ── spawn processor thread ────────────────────────────────────────────
        let processor_thread = {
            let config = config.clone();
            let stop_flag = stop_flag.clone();
            let events_processed = events_processed.clone();
            let queue_size = queue_size.clone();
            let state = state.clone();
            let receiver = rx.clone();
            let sink = sink.clone();

            thread::spawn(move || {
                let mut debouncer = EventDebouncer::new(config.debounce_ms);
                let mut renames = PendingRenames::default();
                let rename_ttl = Duration::from_millis(config.debounce_ms.max(250).saturating_mul(4));

                while !stop_flag.load(Ordering::Relaxed) {
                    let cur_state = match state.lock() {
                        Ok(g) => g.clone(),
                        Err(_) => break,
                    };

                    match cur_state {
                        WatcherState::Paused | WatcherState::Initializing => {
                            thread::sleep(Duration::from_millis(100));
                            continue;
                        }
                        WatcherState::ShuttingDown | WatcherState::Stopped => break,
                        WatcherState::Watching => {}
                    }

                    let mut drained = 0;
                    while let Ok(evt_res) = receiver.try_recv() {
                        drained += 1;
                        match evt_res {
                            Ok(event) => {
                                for change in classify(event, &mut renames) {
                                    debouncer.add_event(change);
                                }
                            }
                            Err(e) => warn!(error = %e, "watcher channel error"),
                        }
                        if drained >= config.batch_size {
                            break;
                        }
                    }

                    let expired = renames.prune(rename_ttl);
                    if expired > 0 {
                        debug!(expired, pending = renames.len(), "dropped unpaired rename halves");
                    }
                    queue_size.store(debouncer.len(), Ordering::SeqCst);

                    if debouncer.is_ready_to_flush() && debouncer.len() > 0 {
                        let batch = debouncer.flush();
                        apply_all(&sink, &batch, &config);
                        events_processed.fetch_add(batch.len(), Ordering::SeqCst);
                        queue_size.store(0, Ordering::SeqCst);
                    }

                    thread::sleep(Duration::from_millis(50));
                }

                // final flush on shutdown
                if debouncer.len() > 0 {
                    let batch = debouncer.flush();
                    apply_all(&sink, &batch, &config);
                    events_processed.fetch_add(batch.len(), Ordering::SeqCst);
                }

                if let Ok(mut g) = state.lock() {
                    *g = WatcherState::Stopped;
                }
            })
        };

        Ok(Self {
            state,
            watched_paths: paths,
            _event_receiver: rx,
            _watcher: actual_watcher,
            processor_thread: Some(processor_thread),
            stop_flag,
            events_processed,
            queue_size,
            start_time: Instant::now(),
            sink,
        })
    }

    // ── public API ──────────────────────────────────────────────────────────

    /// Route changes into `db`. The watcher should get its own connection.
    pub fn with_database(&mut self, db: Database) -> Result<&mut Self> {
        self.sink_mut()?.db = Some(db);
        Ok(self)
    }

    /// Drop cached thumbnails of removed or renamed files.
    pub fn with_thumbnails(&mut self, cache: ThumbnailCache) -> Result<&mut Self> {
        self.sink_mut()?.thumbs = Some(cache);
        Ok(self)
    }

    pub fn with_extract_options(&mut self, opts: ExtractOptions) -> Result<&mut Self> {
        self.sink_mut()?.opts = opts;
        Ok(self)
    }

    fn sink_mut(&self) -> Result<std::sync::MutexGuard<'_, Sink>> {
        self.sink.lock().map_err(|_| anyhow!("watcher sink poisoned"))
    }

    pub fn start(&mut self) -> Result<()> {
        let mut g = self.state.lock().map_err(|_| anyhow!("state"))?;
        match *g {
            WatcherState::Initializing | WatcherState::Paused => {
                *g = WatcherState::Watching;
                info!(paths = self.watched_paths.len(), "watching");
                Ok(())
            }
            WatcherState::Watching => Ok(()), // idempotent
            _ => Err(anyhow!("cannot start from {:?}", *g)),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        let mut g = self.state.lock().map_err(|_| anyhow!("state"))?;
        match *g {
            WatcherState::Watching => {
                *g = WatcherState::Paused;
                Ok(())
            }
            WatcherState::Paused => Ok(()),
            _ => Err(anyhow!("cannot pause from {:?}", *g)),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        let mut g = self.state.lock().map_err(|_| anyhow!("state"))?;
        match *g {
            WatcherState::Paused => {
                *g = WatcherState::Watching;
                Ok(())
            }
            WatcherState::Watching => Ok(()),
            _ => Err(anyhow!("cannot resume from {:?}", *g)),
        }
    }

    pub fn stop(&mut self) -> Result<()> {
        {
            let mut g = self.state.lock().map_err(|_| anyhow!("state"))?;
            if matches!(*g, WatcherState::Stopped | WatcherState::ShuttingDown) {
                return Ok(());
            }
            *g = WatcherState::ShuttingDown;
        }

        self.stop_flag.store(true, Ordering::SeqCst);

        if let Some(h) = self.processor_thread.take() {
            let _ = h.join();
        }

        *self.state.lock().map_err(|_| anyhow!("state"))? = WatcherState::Stopped;
        info!("watcher stopped");
        Ok(())
    }

    pub fn status(&self) -> Result<WatcherStatus> {
        let st = self.state.lock().map_err(|_| anyhow!("state"))?.clone();
        Ok(WatcherStatus {
            state: st,
            events_processed: self.events_processed.load(Ordering::SeqCst),
            queue_size: self.queue_size.load(Ordering::SeqCst),
            start_time: Some(self.start_time),
            watched_paths: self.watched_paths.clone(),
        })
    }
}

fn apply_all(sink: &Mutex<Sink>, batch: &[PendingChange], cfg: &WatcherConfig) {
    let Ok(mut sink) = sink.lock() else {
        warn!("watcher sink poisoned, dropping changes");
        return;
    };
    for ev in batch {
        if let Err(e) = sink.apply(ev, cfg) {
            warn!(path = %ev.path.display(), error = %e, "could not apply change");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.stop(); // ignore errors during drop
    }
}
