//! Temporary file lifecycle.
//!
//! Every pipeline run owns a [`WorkDir`] named after a fresh UUID, so runs never
//! share paths. Files inside it are wrapped in [`TempFileGuard`]s that remove
//! them as soon as the next step no longer needs them; the directory itself is
//! removed when the `WorkDir` is dropped. Both paths tolerate files that are
//! already gone, which makes the cleanup safe on success, error and
//! cancellation (a dropped future drops its guards).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Remove a file, treating "already gone" as success. Other failures are
/// logged and swallowed: cleanup never masks the pipeline's real outcome.
pub fn remove_file_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed temp file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to clean up temp file"),
    }
}

/// Per-invocation scratch directory.
#[derive(Debug)]
pub struct WorkDir {
    id: Uuid,
    path: PathBuf,
}

impl WorkDir {
    /// Create `<root>/songsnap-<uuid>`.
    pub fn create(root: &Path) -> Result<Self> {
        let id = Uuid::new_v4();
        let path = root.join(format!("songsnap-{id}"));
        std::fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created work dir");
        Ok(Self { id, path })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// yt-dlp output template for one download attempt; yt-dlp fills in the
    /// extension. Each attempt gets its own name, so a straggler from an
    /// earlier attempt can never write over a later attempt's file.
    pub fn download_template(&self, attempt: usize) -> PathBuf {
        self.path.join(format!("{}-{attempt}.%(ext)s", self.id))
    }

    /// Where attempt `attempt`'s WAV ends up after yt-dlp's post-processing.
    pub fn audio_path(&self, attempt: usize) -> PathBuf {
        self.path.join(format!("{}-{attempt}.wav", self.id))
    }

    /// Where the canonical PCM snippet is written.
    pub fn pcm_path(&self) -> PathBuf {
        self.path.join(format!("{}.raw", self.id))
    }

    /// Delete everything inside the directory (leftovers of a failed attempt:
    /// `.part` files, un-converted streams, ...). The directory stays.
    pub fn clear(&self) -> Result<()> {
        self.remove_entries(None)
    }

    /// Delete everything inside the directory except the entry named like
    /// `keep`.
    pub fn retain_only(&self, keep: &Path) -> Result<()> {
        self.remove_entries(Some(keep))
    }

    fn remove_entries(&self, keep: Option<&Path>) -> Result<()> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if keep.is_some_and(|keep| keep.file_name() == path.file_name()) {
                continue;
            }
            if path.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove leftover dir");
                }
            } else {
                remove_file_quietly(&path);
            }
        }
        Ok(())
    }

    /// Files currently inside the directory.
    pub fn files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.path) else {
            return Vec::new();
        };
        entries.filter_map(|e| e.ok()).map(|e| e.path()).collect()
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed work dir"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to clean up work dir")
            }
        }
    }
}

/// RAII guard that removes a single file when dropped.
#[derive(Debug)]
pub struct TempFileGuard(PathBuf);

impl TempFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        remove_file_quietly(&self.0);
    }
}
