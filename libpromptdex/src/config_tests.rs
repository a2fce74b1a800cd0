// libpromptdex/src/config_tests.rs

use super::config::{Config, DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use crate::test_utils::ENV_MUTEX;
use std::env;
use std::path::PathBuf;
use tempfile::tempdir;

const KNOBS: &[&str] = &[
    "PROMPTDEX_DB_PATH",
    "PROMPTDEX_CACHE_DIR",
    "PROMPTDEX_ROOTS",
    "PROMPTDEX_RECURSIVE",
    "PROMPTDEX_WORKERS",
    "PROMPTDEX_BATCH_SIZE",
    "PROMPTDEX_FULL_TEXT",
];

fn clear_knobs() {
    for k in KNOBS {
        env::remove_var(k);
    }
}

#[test]
fn load_env_override() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_knobs();
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("nested/custom.db");
    env::set_var("PROMPTDEX_DB_PATH", &db);
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.db_path, db);
    assert!(db.parent().unwrap().is_dir(), "parent dir is created");
    assert_eq!(cfg.workers, DEFAULT_WORKERS);
    assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
    assert!(cfg.full_text);
    assert!(!cfg.recursive);
    clear_knobs();
}

#[test]
fn load_xdg_or_fallback() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_knobs();
    // since XDG_DATA_HOME will normally be present, just test it doesn't error
    let cfg = Config::load().unwrap();
    assert!(cfg.db_path.to_string_lossy().ends_with(".db"));
}

#[test]
fn load_fallback_current_dir() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_knobs();
    let orig_home = env::var_os("HOME");
    let orig_xdg = env::var_os("XDG_DATA_HOME");
    env::remove_var("HOME");
    env::remove_var("XDG_DATA_HOME");

    let cfg = Config::load().unwrap();
    let expected = super::config::workspace_db_name().unwrap();
    assert_eq!(cfg.db_path, PathBuf::from(&expected));
    assert!(expected.starts_with("index_"));
    assert_eq!(cfg.cache_dir, PathBuf::from("thumbs"));

    match orig_home {
        Some(val) => env::set_var("HOME", val),
        None => env::remove_var("HOME"),
    }
    match orig_xdg {
        Some(val) => env::set_var("XDG_DATA_HOME", val),
        None => env::remove_var("XDG_DATA_HOME"),
    }
}

#[test]
fn knobs_are_read() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_knobs();
    let tmp = tempdir().unwrap();
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    let roots = env::join_paths([&a, &b]).unwrap();

    env::set_var("PROMPTDEX_DB_PATH", tmp.path().join("x.db"));
    env::set_var("PROMPTDEX_CACHE_DIR", tmp.path().join("cache"));
    env::set_var("PROMPTDEX_ROOTS", roots);
    env::set_var("PROMPTDEX_RECURSIVE", "yes");
    env::set_var("PROMPTDEX_WORKERS", "2");
    env::set_var("PROMPTDEX_BATCH_SIZE", "7");
    env::set_var("PROMPTDEX_FULL_TEXT", "off");

    let cfg = Config::load().unwrap();
    assert_eq!(cfg.cache_dir, tmp.path().join("cache"));
    assert_eq!(cfg.roots, vec![a, b]);
    assert!(cfg.recursive);
    assert_eq!(cfg.workers, 2);
    assert_eq!(cfg.batch_size, 7);
    assert!(!cfg.full_text);
    clear_knobs();
}

#[test]
fn bad_knobs_are_errors() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_knobs();
    let tmp = tempdir().unwrap();
    env::set_var("PROMPTDEX_DB_PATH", tmp.path().join("x.db"));

    env::set_var("PROMPTDEX_WORKERS", "0");
    assert!(Config::load().is_err());
    env::set_var("PROMPTDEX_WORKERS", "many");
    assert!(Config::load().is_err());
    env::remove_var("PROMPTDEX_WORKERS");

    env::set_var("PROMPTDEX_RECURSIVE", "maybe");
    assert!(Config::load().is_err());
    clear_knobs();
}

#[test]
fn explicit_db_path_defaults() {
    let cfg = Config::with_db_path("/data/idx/index.db");
    assert_eq!(cfg.cache_dir, PathBuf::from("/data/idx/thumbs"));
    assert!(cfg.roots.is_empty());
    assert_eq!(cfg.workers, DEFAULT_WORKERS);
}
