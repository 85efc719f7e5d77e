//! Request-scoped temporary storage for the uploaded PDF and stamp crops.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::ValidationError;

/// Every workspace directory name starts with this.
pub const WORKSPACE_PREFIX: &str = "letterguard-";

/// A private directory for one validation, named
/// `letterguard-<pid>-<random>`. Removed with everything in it when
/// dropped, whichever way the validation ends.
pub struct RequestWorkspace {
    dir: TempDir,
}

impl RequestWorkspace {
    pub fn create(root: &Path) -> Result<Self, ValidationError> {
        fs::create_dir_all(root)?;
        let prefix = format!("{WORKSPACE_PREFIX}{}-", std::process::id());
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?;
        debug!(path = %dir.path().display(), "Request workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn save_pdf(&self, bytes: &[u8]) -> Result<PathBuf, ValidationError> {
        let path = self.dir.path().join("letter.pdf");
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Write a stamp crop as PNG. The file is deleted when the returned
    /// handle drops.
    pub fn save_crop(&self, page_index: usize, crop: &RgbImage) -> Result<ScopedFile, ValidationError> {
        let path = self.dir.path().join(format!("stamp-page-{page_index}.png"));
        crop.save_with_format(&path, ImageFormat::Png)
            .map_err(|e| ValidationError::ImageProcessing(format!("Failed to save stamp crop: {e}")))?;
        Ok(ScopedFile { path })
    }

    /// Remove the directory now, reporting failure instead of only logging it.
    pub fn close(self) -> Result<(), ValidationError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Request workspace removed");
        Ok(())
    }
}

/// A file deleted on drop.
pub struct ScopedFile {
    path: PathBuf,
}

impl ScopedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to delete temporary file");
            }
        }
    }
}

/// Delete workspace directories left behind by a crashed process.
/// Only `letterguard-*` directories older than `max_age` are touched.
/// Returns the number removed.
pub fn sweep_orphans(root: &Path, max_age: Duration) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(_) => return 0, // Temp root may not exist yet
    };

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_workspace = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX));
        if !is_workspace || !path.is_dir() {
            continue;
        }

        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= max_age);
        if !old_enough {
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned workspace"),
        }
    }

    if removed > 0 {
        info!(
            workspaces_removed = removed,
            "Cleaned orphaned validation workspaces from previous run"
        );
    }
    removed
}
