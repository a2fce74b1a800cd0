// libpromptdex/src/watcher_tests.rs
//! End-to-end watcher tests against real file-system events.

use crate::test_utils::{a1111_block, write_png};
use crate::utils::to_db_path;
use crate::watcher::WatcherConfig;
use crate::Library;

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn fast() -> Option<WatcherConfig> {
    Some(WatcherConfig {
        debounce_ms: 50,
        retry_backoff_ms: 20,
        ..Default::default()
    })
}

/// Polls a fresh connection until `path` is (or isn't) indexed.
fn wait_for_row(lib: &Library, path: &Path, present: bool, timeout: Duration) {
    let start = Instant::now();
    let key = to_db_path(path);
    loop {
        let db = crate::db::open(&lib.config().db_path).unwrap();
        if db.get(&key).unwrap().is_some() == present {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "timed out waiting for {} to be {}",
                path.display(),
                if present { "indexed" } else { "removed" }
            );
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn new_image_is_indexed_and_removal_deletes_it() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("watched");
    fs::create_dir(&dir).unwrap();
    let lib = Library::open_at(tmp.path().join("index.db")).unwrap();

    let mut watcher = lib.watch(&dir, fast()).unwrap();
    thread::sleep(Duration::from_millis(100));

    let img = dir.join("fresh.png");
    let block = a1111_block("a watched cat", "blurry");
    write_png(&img, 8, 8, &[("parameters", block.as_str())]);
    wait_for_row(&lib, &img, true, Duration::from_secs(10));

    let db = crate::db::open(&lib.config().db_path).unwrap();
    let rec = db.get(&to_db_path(&img)).unwrap().unwrap();
    assert_eq!(rec.prompt, "a watched cat");
    assert_eq!(rec.width, Some(8));

    fs::remove_file(&img).unwrap();
    wait_for_row(&lib, &img, false, Duration::from_secs(10));

    watcher.stop().unwrap();
    assert!(watcher.status().unwrap().events_processed > 0);
}

#[test]
fn non_images_are_ignored() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("watched");
    fs::create_dir(&dir).unwrap();
    let lib = Library::open_at(tmp.path().join("index.db")).unwrap();

    let mut watcher = lib.watch(&dir, fast()).unwrap();
    thread::sleep(Duration::from_millis(100));
    fs::write(dir.join("notes.txt"), "hello").unwrap();
    let img = dir.join("marker.png");
    write_png(&img, 2, 2, &[]);
    wait_for_row(&lib, &img, true, Duration::from_secs(10));
    watcher.stop().unwrap();

    let db = crate::db::open(&lib.config().db_path).unwrap();
    assert_eq!(db.count().unwrap(), 1);
}

#[test]
fn rename_file_keeps_its_row() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("watched");
    fs::create_dir(&dir).unwrap();
    let old = dir.join("old.png");
    let block = a1111_block("renamed prompt", "");
    write_png(&old, 4, 4, &[("parameters", block.as_str())]);

    let mut lib = Library::open_at(tmp.path().join("index.db")).unwrap();
    assert_eq!(lib.scan(&[&dir]).unwrap(), 1);

    let mut watcher = lib.watch(&dir, fast()).unwrap();
    thread::sleep(Duration::from_millis(100));

    let new = dir.join("new.png");
    fs::rename(&old, &new).unwrap();
    wait_for_row(&lib, &new, true, Duration::from_secs(10));
    wait_for_row(&lib, &old, false, Duration::from_secs(10));
    watcher.stop().unwrap();

    let rec = lib.metadata(&to_db_path(&new)).unwrap().unwrap();
    assert_eq!(rec.prompt, "renamed prompt");
    assert_eq!(rec.file_name, "new.png");
}
