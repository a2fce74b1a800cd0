// libpromptdex/src/scan_tests.rs

use super::config::Config;
use super::db;
use super::scan::{scan_roots, Scanner};
use crate::test_utils::{a1111_block, write_png};
use crate::utils::to_db_path;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn config(tmp: &Path, root: &Path) -> Config {
    let mut cfg = Config::with_db_path(tmp.join("index.db"));
    cfg.roots = vec![root.to_path_buf()];
    cfg
}

fn png_with_lora(path: &Path, prompt: &str) {
    let block = a1111_block(&format!("{prompt} <lora:detail:0.5>"), "blurry");
    write_png(path, 4, 4, &[("parameters", block.as_str())]);
}

#[test]
fn rescan_without_changes_returns_zero() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    fs::create_dir(&imgs).unwrap();
    png_with_lora(&imgs.join("a.png"), "a cat");
    png_with_lora(&imgs.join("b.png"), "a dog");
    fs::write(imgs.join("notes.txt"), "not an image").unwrap();

    let scanner = Scanner::new(config(tmp.path(), &imgs));
    let no_extra: &[PathBuf] = &[];
    assert_eq!(scanner.scan(no_extra).unwrap(), 2);
    assert_eq!(scanner.scan(no_extra).unwrap(), 0);
    assert_eq!(scanner.scan(no_extra).unwrap(), 0);

    let db = db::open(tmp.path().join("index.db")).unwrap();
    assert_eq!(db.count().unwrap(), 2);
    let rec = db.get(&to_db_path(imgs.join("a.png"))).unwrap().unwrap();
    assert_eq!(rec.prompt, "a cat <lora:detail:0.5>");
    assert_eq!(rec.loras.len(), 1);
}

#[test]
fn empty_tree_scans_to_zero_twice() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("empty");
    fs::create_dir(&imgs).unwrap();
    let scanner = Scanner::new(config(tmp.path(), &imgs));
    let no_extra: &[PathBuf] = &[];
    assert_eq!(scanner.scan(no_extra).unwrap(), 0);
    assert_eq!(scanner.scan(no_extra).unwrap(), 0);
}

#[test]
fn deleted_file_is_removed_with_its_loras() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    fs::create_dir(&imgs).unwrap();
    let gone = imgs.join("gone.png");
    png_with_lora(&gone, "to be deleted");
    png_with_lora(&imgs.join("kept.png"), "kept");

    let scanner = Scanner::new(config(tmp.path(), &imgs));
    let no_extra: &[PathBuf] = &[];
    assert_eq!(scanner.scan(no_extra).unwrap(), 2);

    fs::remove_file(&gone).unwrap();
    let report = scanner.scan_report(no_extra).unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.removed, 1);
    assert_eq!(report.removed_paths, vec![to_db_path(&gone)]);

    let db = db::open(tmp.path().join("index.db")).unwrap();
    assert!(db.get(&to_db_path(&gone)).unwrap().is_none());
    let orphans: i64 = db
        .conn()
        .query_row(
            "SELECT COUNT(*) FROM image_loras WHERE image_id NOT IN (SELECT id FROM images)",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
    let loras: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM image_loras", [], |r| r.get(0))
        .unwrap();
    assert_eq!(loras, 1);
}

#[test]
fn busy_scanner_skips_and_guard_resets() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    fs::create_dir(&imgs).unwrap();
    png_with_lora(&imgs.join("a.png"), "a cat");
    let scanner = Scanner::new(config(tmp.path(), &imgs));
    let no_extra: &[PathBuf] = &[];

    {
        let _held = scanner.try_begin().expect("idle scanner");
        assert!(scanner.is_scanning());
        let report = scanner.scan_report(no_extra).unwrap();
        assert!(report.skipped_busy);
        assert_eq!(report.indexed, 0);
    }
    assert!(!scanner.is_scanning());

    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _held = scanner.try_begin().unwrap();
        panic!("boom");
    }));
    assert!(unwound.is_err());
    assert!(!scanner.is_scanning(), "guard resets while unwinding");

    assert_eq!(scanner.scan(no_extra).unwrap(), 1);
}

#[test]
fn small_batches_and_single_worker_index_everything() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    fs::create_dir(&imgs).unwrap();
    for i in 0..7 {
        png_with_lora(&imgs.join(format!("img_{i}.png")), &format!("prompt {i}"));
    }
    let mut cfg = config(tmp.path(), &imgs);
    cfg.workers = 1;
    cfg.batch_size = 2;
    let report = Scanner::new(cfg).scan_report(&[] as &[PathBuf]).unwrap();
    assert_eq!(report.indexed, 7);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(report.failed_files, 0);
}

#[test]
fn failed_batch_rolls_back_only_itself() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    fs::create_dir(&imgs).unwrap();
    for name in ["a.png", "b.png", "bad.png", "c.png"] {
        png_with_lora(&imgs.join(name), name);
    }
    {
        let db = db::open(tmp.path().join("index.db")).unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON images
                 WHEN NEW.file_name = 'bad.png'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
    }

    let mut cfg = config(tmp.path(), &imgs);
    cfg.workers = 1;
    cfg.batch_size = 2;
    let report = Scanner::new(cfg).scan_report(&[] as &[PathBuf]).unwrap();
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.indexed, 2);

    let db = db::open(tmp.path().join("index.db")).unwrap();
    assert_eq!(db.count().unwrap(), 2);
    assert!(db.get(&to_db_path(imgs.join("bad.png"))).unwrap().is_none());
    let loras: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM image_loras", [], |r| r.get(0))
        .unwrap();
    assert_eq!(loras, 2);
}

#[test]
fn depth_and_indexed_folders() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    let sub = imgs.join("sub");
    fs::create_dir_all(&sub).unwrap();
    png_with_lora(&imgs.join("top.png"), "top");
    png_with_lora(&sub.join("deep.png"), "deep");

    let scanner = Scanner::new(config(tmp.path(), &imgs));
    let no_extra: &[PathBuf] = &[];
    // depth 1 only
    assert_eq!(scanner.scan(no_extra).unwrap(), 1);
    // an extra root gets its files indexed...
    assert_eq!(scanner.scan(&[sub.clone()]).unwrap(), 1);
    // ...and afterwards is rescanned as an indexed folder
    png_with_lora(&sub.join("later.png"), "later");
    assert_eq!(scanner.scan(no_extra).unwrap(), 1);
}

#[test]
fn recursive_mode_walks_the_tree_once() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    let sub = imgs.join("a/b");
    fs::create_dir_all(&sub).unwrap();
    png_with_lora(&imgs.join("top.png"), "top");
    png_with_lora(&sub.join("deep.png"), "deep");
    fs::write(sub.join("index.db"), b"").unwrap();

    let mut cfg = config(tmp.path(), &imgs);
    cfg.recursive = true;
    let scanner = Scanner::new(cfg);
    // passing a nested root must not double-submit files
    assert_eq!(scanner.scan(&[sub.clone()]).unwrap(), 2);
}

#[test]
fn nested_roots_are_pruned() {
    let tmp = tempdir().unwrap();
    let a = tmp.path().join("a");
    let ab = a.join("b");
    let abc = tmp.path().join("abc");
    fs::create_dir_all(&ab).unwrap();
    fs::create_dir_all(&abc).unwrap();
    let missing = tmp.path().join("missing");
    let cands = vec![ab.clone(), a.clone(), abc.clone(), missing, a.clone()];

    let flat = scan_roots(&cands, false);
    assert_eq!(flat.len(), 3);

    let rec = scan_roots(&cands, true);
    assert_eq!(rec, vec![to_db_path(&a), to_db_path(&abc)]);
}

#[test]
fn unreadable_image_does_not_abort_the_batch() {
    let tmp = tempdir().unwrap();
    let imgs = tmp.path().join("imgs");
    fs::create_dir(&imgs).unwrap();
    png_with_lora(&imgs.join("good.png"), "fine");
    fs::write(imgs.join("broken.png"), b"\x89PNG\r\n\x1a\ntruncated").unwrap();
    fs::write(imgs.join("empty.jpg"), b"").unwrap();

    let scanner = Scanner::new(config(tmp.path(), &imgs));
    let report = scanner.scan_report(&[] as &[PathBuf]).unwrap();
    // corrupt and zero-byte files still get a minimal row
    assert_eq!(report.indexed, 3);
    let db = db::open(tmp.path().join("index.db")).unwrap();
    let broken = db.get(&to_db_path(imgs.join("broken.png"))).unwrap().unwrap();
    assert!(broken.prompt.is_empty());
}
