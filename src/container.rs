//! Splitting, rebuilding and inspecting existing containers.
//!
//! Only the trailing [`SAVE_SIZE`] bytes are ever replaced. The prefix,
//! including the save digest recorded at build time, is written back
//! unchanged, so after an edit the stored save digest is stale. The firmware
//! does not check it.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::framer::{hex, md5_reader, RawDigest};
use crate::layout::{ContainerLayout, DIGEST_LEN, RESERVED_LEN, SAVE_SIZE};

/// A container divided into its immutable prefix and its save region.
#[derive(Debug, Clone)]
pub struct SplitContainer {
    pub prefix: Vec<u8>,
    pub save: Vec<u8>,
}

/// Read `path` and cut off the trailing save region.
pub fn split(path: &Path) -> Result<SplitContainer> {
    let mut data =
        fs::read(path).with_context(|| format!("Failed to read container {}", path.display()))?;
    let len = data.len() as u64;
    if len < SAVE_SIZE {
        bail!(
            "{} is {} bytes, smaller than the {} byte save partition",
            path.display(),
            len,
            SAVE_SIZE
        );
    }

    let save = data.split_off((len - SAVE_SIZE) as usize);
    Ok(SplitContainer { prefix: data, save })
}

/// Write `prefix` followed by the contents of `save_image` to `path`.
///
/// The new container is written next to `path` and renamed over it, so a
/// failure leaves the original intact. A symlinked `path` keeps its link; the
/// file it points to is replaced.
pub fn rebuild(path: &Path, prefix: &[u8], save_image: &Path) -> Result<()> {
    let image_len = fs::metadata(save_image)
        .with_context(|| format!("Failed to stat {}", save_image.display()))?
        .len();
    if image_len != SAVE_SIZE {
        warn!(
            "Save image {} is {} bytes, expected {}; the container will not load",
            save_image.display(),
            image_len,
            SAVE_SIZE
        );
    }

    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to resolve {}", path.display()));
        }
    };
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    tmp.write_all(prefix)
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    let mut image = File::open(save_image)
        .with_context(|| format!("Failed to open {}", save_image.display()))?;
    io::copy(&mut image, &mut tmp)
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", tmp.path().display()))?;

    if let Ok(meta) = fs::metadata(&target) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .with_context(|| format!("Failed to set permissions: {}", tmp.path().display()))?;
    }

    tmp.persist(&target)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", target.display()))?;

    info!("Rebuilt {}", path.display());
    Ok(())
}

/// Copy `path` to `<path>.bak`.
pub fn backup(path: &Path) -> Result<PathBuf> {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    let backup = PathBuf::from(name);
    fs::copy(path, &backup).with_context(|| {
        format!("Error copying file {} to {}", path.display(), backup.display())
    })?;
    info!("Backed up {} to {}", path.display(), backup.display());
    Ok(backup)
}

/// Swap the save region of `path` for `replacement`.
pub fn replace_save(path: &Path, replacement: &Path, make_backup: bool) -> Result<()> {
    let parts = split(path)?;
    if make_backup {
        backup(path)?;
    }
    rebuild(path, &parts.prefix, replacement)
}

/// Write the save region of `path` to `output`.
pub fn extract_save(path: &Path, output: &Path) -> Result<()> {
    let parts = split(path)?;
    fs::write(output, &parts.save)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Extracted save partition to {}", output.display());
    Ok(())
}

/// Result of checking a container against its embedded digests.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub layout: ContainerLayout,
    pub fs_digest_stored: String,
    pub fs_digest_actual: String,
    pub fs_digest_ok: bool,
    pub reserved_zero: bool,
    pub save_digest_stored: String,
    pub save_digest_actual: String,
    /// False after any in-place save edit; not an error
    pub save_digest_ok: bool,
}

impl InspectReport {
    /// The read-only region and header are intact.
    pub fn is_valid(&self) -> bool {
        self.fs_digest_ok && self.reserved_zero
    }
}

/// Verify the layout and digests of `path`.
pub fn inspect(path: &Path) -> Result<InspectReport> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let total_len = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let layout = ContainerLayout::from_len(total_len)
        .with_context(|| format!("{} is not a valid container", path.display()))?;

    let fs_actual = md5_reader(&mut (&mut file).take(layout.fs_region_len))
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut header = vec![0u8; layout.prefix_len() as usize - layout.fs_region_len as usize];
    file.seek(SeekFrom::Start(layout.fs_digest_offset))
        .and_then(|_| file.read_exact(&mut header))
        .with_context(|| format!("Failed to read header of {}", path.display()))?;

    let digest = DIGEST_LEN as usize;
    let reserved = RESERVED_LEN as usize;
    let fs_stored = raw(&header[..digest]);
    let reserved_zero = header[digest..digest + reserved].iter().all(|&b| b == 0);
    let save_stored = raw(&header[digest + reserved..]);

    let save_actual = md5_reader(&mut file)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(InspectReport {
        path: path.to_path_buf(),
        layout,
        fs_digest_stored: hex(&fs_stored),
        fs_digest_actual: hex(&fs_actual),
        fs_digest_ok: fs_stored == fs_actual,
        reserved_zero,
        save_digest_stored: hex(&save_stored),
        save_digest_actual: hex(&save_actual),
        save_digest_ok: save_stored == save_actual,
    })
}

fn raw(bytes: &[u8]) -> RawDigest {
    let mut digest = [0u8; 16];
    digest.copy_from_slice(bytes);
    digest
}
