//! Content-addressed thumbnail cache.
//!
//! Entries are named `{sha256(path)}_{mtime}_w{size}.webp`. Touching the
//! source file changes its mtime and so orphans every old entry; `put`
//! sweeps all entries sharing the path hash before writing, which bounds
//! the cache to one generation per source path.
//!
//! The cache is advisory. Every failure is logged and reported as a miss.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::utils::{mtime_secs, to_db_path};

#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    dir: PathBuf,
}

impl ThumbnailCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key(path: &Path) -> String {
        hex::encode(Sha256::digest(to_db_path(path).as_bytes()))
    }

    /// Where the entry for the file's *current* mtime lives. `None` when
    /// the source can't be stat'ed.
    pub fn entry_path<P: AsRef<Path>>(&self, path: P, size: u32) -> Option<PathBuf> {
        let path = path.as_ref();
        let meta = fs::metadata(path).ok()?;
        let name = format!("{}_{}_w{size}.webp", Self::key(path), mtime_secs(&meta));
        Some(self.dir.join(name))
    }

    pub fn get<P: AsRef<Path>>(&self, path: P, size: u32) -> Option<DynamicImage> {
        let entry = self.entry_path(path, size)?;
        if !entry.is_file() {
            return None;
        }
        match image::open(&entry) {
            Ok(img) => Some(img),
            Err(e) => {
                debug!(entry = %entry.display(), error = %e, "unreadable thumbnail");
                None
            }
        }
    }

    /// Store `img` for the file's current mtime and return the entry path.
    pub fn put<P: AsRef<Path>>(&self, path: P, size: u32, img: &DynamicImage) -> Option<PathBuf> {
        let path = path.as_ref();
        let entry = self.entry_path(path, size)?;
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "cannot create thumbnail dir");
            return None;
        }
        self.purge(path);

        let file_name = entry.file_name()?.to_string_lossy().into_owned();
        let tmp = self.dir.join(format!(".{file_name}.tmp"));
        let written = DynamicImage::ImageRgba8(img.to_rgba8())
            .save_with_format(&tmp, ImageFormat::WebP)
            .map_err(anyhow::Error::from)
            .and_then(|_| fs::rename(&tmp, &entry).map_err(anyhow::Error::from));

        match written {
            Ok(()) => Some(entry),
            Err(e) => {
                warn!(entry = %entry.display(), error = %e, "thumbnail write failed");
                let _ = fs::remove_file(&tmp);
                None
            }
        }
    }

    /// Remove every entry belonging to `path`; returns how many went.
    pub fn purge<P: AsRef<Path>>(&self, path: P) -> usize {
        let prefix = format!("{}_", Self::key(path.as_ref()));
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            if entry.file_name().to_string_lossy().starts_with(&prefix)
                && fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }
        removed
    }
}
