use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::{
    collections::hash_map::DefaultHasher,
    env,
    ffi::OsString,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Runtime configuration, resolved once and handed to the scanner, the
/// watcher and the façade.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Folders scanned on every cycle in addition to those already indexed.
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    pub workers: usize,
    pub batch_size: usize,
    /// Maintain the FTS index; `false` forces substring search.
    pub full_text: bool,
}

impl Config {
    /// Defaults for an explicit DB path: the thumbnail cache sits next to it.
    pub fn with_db_path<P: AsRef<Path>>(db_path: P) -> Self {
        let db_path = db_path.as_ref().to_path_buf();
        let cache_dir = db_path
            .parent()
            .map(|p| p.join("thumbs"))
            .unwrap_or_else(|| PathBuf::from("thumbs"));
        Self {
            db_path,
            cache_dir,
            roots: Vec::new(),
            recursive: false,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            full_text: true,
        }
    }

    /// Resolve configuration from environment or derive one per-workspace.
    ///
    /// DB path priority:
    /// 1. `PROMPTDEX_DB_PATH` env-var (explicit override)
    /// 2. *Workspace-local* file under XDG data dir
    ///    (`~/.local/share/promptdex/index_<hash>.db`)
    /// 3. Fallback to `./index_<hash>.db` when we cannot locate an XDG dir
    ///
    /// The remaining knobs come from `PROMPTDEX_CACHE_DIR`,
    /// `PROMPTDEX_ROOTS`, `PROMPTDEX_RECURSIVE`, `PROMPTDEX_WORKERS`,
    /// `PROMPTDEX_BATCH_SIZE` and `PROMPTDEX_FULL_TEXT`.
    pub fn load() -> Result<Self> {
        let dirs = project_dirs();
        let db_path = resolve_db_path(dirs.as_ref())?;

        let mut cfg = Self::with_db_path(&db_path);
        if let Some(v) = env::var_os("PROMPTDEX_CACHE_DIR") {
            cfg.cache_dir = expand(&v);
        } else if let Some(d) = &dirs {
            cfg.cache_dir = d.cache_dir().join("thumbs");
        }
        if let Some(v) = env::var_os("PROMPTDEX_ROOTS") {
            cfg.roots = env::split_paths(&v)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| expand(p.as_os_str()))
                .collect();
        }
        if let Some(b) = env_flag("PROMPTDEX_RECURSIVE")? {
            cfg.recursive = b;
        }
        if let Some(b) = env_flag("PROMPTDEX_FULL_TEXT")? {
            cfg.full_text = b;
        }
        if let Some(n) = env_count("PROMPTDEX_WORKERS")? {
            cfg.workers = n;
        }
        if let Some(n) = env_count("PROMPTDEX_BATCH_SIZE")? {
            cfg.batch_size = n;
        }
        Ok(cfg)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    // If HOME and XDG_DATA_HOME are missing we can't resolve an XDG path
    if env::var_os("HOME").is_some() || env::var_os("XDG_DATA_HOME").is_some() {
        ProjectDirs::from("io", "Promptdex", "promptdex")
    } else {
        None
    }
}

fn resolve_db_path(dirs: Option<&ProjectDirs>) -> Result<PathBuf> {
    // 1) explicit override
    if let Some(val) = env::var_os("PROMPTDEX_DB_PATH") {
        let p = expand(&val);
        if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        return Ok(p);
    }

    // 2) derive per-workspace DB name from CWD hash
    let file_name = workspace_db_name()?;
    if let Some(dirs) = dirs {
        let dir = dirs.data_dir();
        std::fs::create_dir_all(dir)?;
        return Ok(dir.join(file_name));
    }

    // 3) very last resort – workspace-relative DB
    Ok(PathBuf::from(file_name))
}

/// `index_<hash>.db`, where the hash is taken over the current directory.
pub fn workspace_db_name() -> Result<String> {
    let cwd = env::current_dir()?;
    let mut h = DefaultHasher::new();
    cwd.hash(&mut h);
    Ok(format!("index_{:016x}.db", h.finish()))
}

fn expand(raw: &std::ffi::OsStr) -> PathBuf {
    let s = raw.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&s).into_owned())
}

fn env_value(key: &str) -> Option<String> {
    env::var_os(key)
        .map(|v: OsString| v.to_string_lossy().trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    let Some(v) = env_value(key) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => anyhow::bail!("{key}: expected a boolean, got `{v}`"),
    }
}

fn env_count(key: &str) -> Result<Option<usize>> {
    let Some(v) = env_value(key) else {
        return Ok(None);
    };
    let n: usize = v
        .parse()
        .with_context(|| format!("{key}: expected a positive integer, got `{v}`"))?;
    if n == 0 {
        anyhow::bail!("{key} must be at least 1");
    }
    Ok(Some(n))
}
