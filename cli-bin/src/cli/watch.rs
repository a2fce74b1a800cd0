// src/cli/watch.rs

use anyhow::Result;
use clap::Args;
use libpromptdex::utils::canonicalize_lossy;
use libpromptdex::{Library, WatcherConfig, WatcherState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

use super::Format;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory to watch (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Debounce window in milliseconds
    #[arg(long, default_value_t = 250)]
    pub debounce_ms: u64,
}

/// Watch until Ctrl+C.
pub fn run(args: &WatchArgs, lib: &Library, fmt: Format) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r_clone = running.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping watcher");
        r_clone.store(false, Ordering::SeqCst);
    })?;
    run_until(args, lib, fmt, &running)
}

/// Watch while `running` holds; split out so tests can stop it.
pub fn run_until(args: &WatchArgs, lib: &Library, fmt: Format, running: &AtomicBool) -> Result<()> {
    let config = WatcherConfig {
        debounce_ms: args.debounce_ms,
        ..Default::default()
    };
    let root = canonicalize_lossy(&args.path);
    info!("Starting watcher for directory: {}", root.display());
    let mut watcher = lib.watch(&root, Some(config))?;

    let start_time = Instant::now();
    let mut last_status_time = Instant::now();
    while running.load(Ordering::SeqCst) {
        let status = watcher.status()?;
        if status.state == WatcherState::Stopped {
            break;
        }
        if last_status_time.elapsed() > Duration::from_secs(10) {
            info!(
                uptime_s = start_time.elapsed().as_secs(),
                events = status.events_processed,
                queue = status.queue_size,
                "watcher running"
            );
            last_status_time = Instant::now();
        }
        thread::sleep(Duration::from_millis(200));
    }

    watcher.stop()?;
    let status = watcher.status()?;
    match fmt {
        Format::Text => println!("Watcher stopped after {} change(s).", status.events_processed),
        Format::Json => println!(
            "{}",
            serde_json::json!({ "events_processed": status.events_processed })
        ),
    }
    Ok(())
}
