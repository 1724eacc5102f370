//! Filesystem builder - packs the staged tree into the read-only region.

use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use crate::backend::FilesystemImageBackend;
use crate::config::Owner;

/// Compress `staging` into an unpadded squashfs blob at `output`.
///
/// Returns the size of the blob. Padding and digests are the framer's job.
pub fn create_squashfs(
    backend: &dyn FilesystemImageBackend,
    staging: &Path,
    output: &Path,
    owner: Owner,
) -> Result<u64> {
    if !staging.is_dir() {
        bail!("Staging directory {} does not exist", staging.display());
    }

    info!("Creating squashfs from {}...", staging.display());
    backend.build_squashfs(staging, output, owner)?;

    let size = fs::metadata(output)
        .with_context(|| format!("squashfs output {} missing", output.display()))?
        .len();
    if size == 0 {
        bail!("squashfs output {} is empty", output.display());
    }

    info!("Squashfs created: {} bytes", size);
    Ok(size)
}
