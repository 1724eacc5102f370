//! Scratch directories owned by a single operation.
//!
//! Each build or edit allocates its own [`WorkDir`]; the directory and
//! everything in it is removed when the handle is dropped, whether the
//! operation succeeded or bailed out halfway.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An exclusively owned scratch directory.
#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    label: String,
}

impl WorkDir {
    /// Create a fresh scratch directory for the operation named `label`.
    pub fn new(label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("uceforge-{}-", label))
            .tempdir()
            .with_context(|| format!("Failed to create temp dir for {}", label))?;
        debug!("Created temp dir {} for {}", dir.path().display(), label);
        Ok(Self {
            dir: Some(dir),
            label: label.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Path of an entry inside the scratch directory.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path().join(name)
    }

    /// Create (or recreate empty) a subdirectory.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        prepare_work_dir(self.path(), name)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed temp dir {} for {}", path.display(), self.label),
                Err(e) => warn!("Failed to remove temp dir {}: {}", path.display(), e),
            }
        }
    }
}

/// Prepare a work directory, removing it if it exists and creating it fresh.
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> Result<PathBuf> {
    let work_dir = parent_dir.join(name);
    reset_dir(&work_dir)?;
    Ok(work_dir)
}

/// Make `dir` an existing, empty directory.
pub fn reset_dir(dir: &Path) -> Result<()> {
    if dir.is_symlink() || dir.is_file() {
        fs::remove_file(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    } else if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove directory {}", dir.display()))?;
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workdir_removed_on_drop() {
        let path = {
            let work = WorkDir::new("test").unwrap();
            fs::write(work.join("file"), b"data").unwrap();
            assert!(work.path().is_dir());
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_independent_workdirs() {
        let a = WorkDir::new("build").unwrap();
        let b = WorkDir::new("build").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_subdir_is_recreated_empty() {
        let work = WorkDir::new("test").unwrap();
        let sub = work.subdir("data").unwrap();
        fs::write(sub.join("stale"), b"x").unwrap();
        let sub = work.subdir("data").unwrap();
        assert_eq!(fs::read_dir(&sub).unwrap().count(), 0);
    }
}
