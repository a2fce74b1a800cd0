//! Misc shared helpers: path normalization and file probing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// File extensions (lower-case, no dot) the scanner and watcher index.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Normalize a path string into its index identity.
///
/// * back-slashes become forward slashes
/// * a Windows verbatim prefix (`//?/`) is dropped
/// * runs of `/` collapse to one, except a leading `//` (UNC share)
/// * a trailing `/` is removed unless the path is the root itself
///
/// The function is idempotent and slash-direction invariant.
pub fn normalize_path(raw: &str) -> String {
    let mut s = raw.replace('\\', "/");
    while let Some(rest) = s.strip_prefix("//?/") {
        s = rest.to_string();
    }

    let unc = s.starts_with("//") && !s.starts_with("///");
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if unc {
        out.insert(0, '/');
    }

    while out.len() > 1 && out.ends_with('/') && !(unc && out.len() <= 2) {
        out.pop();
    }
    out
}

/// Normalize any path-like value for storage in the index.
pub fn to_db_path<P: AsRef<Path>>(p: P) -> String {
    normalize_path(&p.as_ref().to_string_lossy())
}

/// Canonicalize when possible, otherwise hand back the input unchanged.
pub fn canonicalize_lossy<P: AsRef<Path>>(p: P) -> PathBuf {
    let p = p.as_ref();
    fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

/// Last path component of a normalized path.
pub fn file_name_of(norm: &str) -> String {
    norm.rsplit('/').next().unwrap_or(norm).to_string()
}

/// Parent directory of a normalized path (`""` when there is none).
pub fn folder_of(norm: &str) -> String {
    match norm.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => norm[..idx].to_string(),
        None => String::new(),
    }
}

/// Does the extension belong to the image allow-list?
pub fn is_image_path<P: AsRef<Path>>(p: P) -> bool {
    p.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Database files and their WAL/SHM siblings never get indexed.
pub fn is_database_artifact<P: AsRef<Path>>(p: P) -> bool {
    p.as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.ends_with(".db") || name.ends_with("-wal") || name.ends_with("-shm"))
        .unwrap_or(false)
}

/// Modification time in whole unix seconds, `0` when unavailable.
pub fn mtime_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
