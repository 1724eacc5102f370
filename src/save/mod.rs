//! Save-partition builder.
//!
//! Produces the 4 MiB ext4 image appended to a container. Sources are tried
//! in order and the first usable one wins:
//!
//! 1. a single `save.*` file (raw image, or a zip holding one)
//! 2. loose files from the staged `save/` directory
//! 3. a stock blank image, generated on the fly if none is installed
//!
//! A source that exists but cannot be used (wrong size, bad archive, not an
//! ext4 filesystem) is reported as [`SaveSource::Corrupt`] and the next one is
//! tried. Tool and I/O failures abort the build instead.

pub mod archive;
pub mod permissions;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{FilesystemImageBackend, ImageFormatError};
use crate::config::{Config, Owner};
use crate::layout::SAVE_SIZE;
use crate::staging::SaveInputs;
use crate::workdir::WorkDir;

pub use permissions::{chmod_tree, normalize_image, SAVE_MODE};

/// Overlay directories the console expects at the partition root.
pub const OVERLAY_DIRS: &[&str] = &["upper", "work"];

/// Placeholder file the firmware requires inside `upper/`.
pub const PLACEHOLDER: &str = "upper/.keep";

/// Outcome of probing one save source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveSource {
    /// Usable; the path is the candidate image or directory
    Found(PathBuf),
    /// Present but unusable
    Corrupt { path: PathBuf, reason: String },
    /// Not provided
    Absent,
}

/// Which branch produced the save partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveKind {
    Image,
    Archive,
    LooseDir,
    StockBlank,
    GeneratedBlank,
}

impl std::fmt::Display for SaveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SaveKind::Image => "save image",
            SaveKind::Archive => "save archive",
            SaveKind::LooseDir => "loose save files",
            SaveKind::StockBlank => "stock blank image",
            SaveKind::GeneratedBlank => "generated blank image",
        };
        write!(f, "{}", name)
    }
}

/// A save source that was present but not used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// A finished save partition.
#[derive(Debug)]
pub struct SavePartition {
    pub image: PathBuf,
    pub kind: SaveKind,
    /// Sources that were present but skipped, in the order they were tried
    pub skipped: Vec<SkippedSource>,
}

/// Build the save partition for a container into `work`.
pub fn build_save_partition(
    backend: &dyn FilesystemImageBackend,
    config: &Config,
    inputs: &SaveInputs,
    work: &WorkDir,
) -> Result<SavePartition> {
    let output = work.join("save_partition.img");
    let owner = config.save_owner;
    let mut skipped = Vec::new();

    // 1. single save file
    if let Some(save_file) = &inputs.save_file {
        let kind = if is_archive(save_file) {
            SaveKind::Archive
        } else {
            SaveKind::Image
        };
        let probed = probe_save_file(save_file, &work.subdir("extracted")?);
        if let Some(candidate) = note(probed, &mut skipped) {
            match adopt_image(backend, &candidate, &output, owner) {
                Ok(()) => {
                    remove_if_exists(save_file)?;
                    info!("Using {} as the save partition", kind);
                    return Ok(SavePartition {
                        image: output,
                        kind,
                        skipped,
                    });
                }
                Err(e) if e.downcast_ref::<ImageFormatError>().is_some() => {
                    remove_if_exists(save_file)?;
                    note(
                        SaveSource::Corrupt {
                            path: save_file.clone(),
                            reason: format!("{:#}", e),
                        },
                        &mut skipped,
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to prepare save image {}", save_file.display())
                    });
                }
            }
        } else {
            remove_if_exists(save_file)?;
        }
    }

    // 2. loose files
    if let Some(loose) = note(probe_loose_dir(inputs.loose_dir.as_deref())?, &mut skipped) {
        ensure_save_layout(&loose)?;
        chmod_tree(&loose, SAVE_MODE)?;
        format_save_image(backend, &loose, &output, owner)?;
        info!("Packed loose save files into the save partition");
        return Ok(SavePartition {
            image: output,
            kind: SaveKind::LooseDir,
            skipped,
        });
    }

    // 3. stock blank
    if let Some(stock) = note(
        probe_stock_image(config.blank_save_image.as_deref()),
        &mut skipped,
    ) {
        fs::copy(&stock, &output).with_context(|| {
            format!("Error copying file {} to {}", stock.display(), output.display())
        })?;
        info!("Using stock blank save image {}", stock.display());
        return Ok(SavePartition {
            image: output,
            kind: SaveKind::StockBlank,
            skipped,
        });
    }

    generate_blank(backend, owner, work, &output)?;
    Ok(SavePartition {
        image: output,
        kind: SaveKind::GeneratedBlank,
        skipped,
    })
}

/// Probe a single save file, extracting it first if it is an archive.
pub fn probe_save_file(path: &Path, extract_dir: &Path) -> SaveSource {
    let candidate = if is_archive(path) {
        match archive::extract_save_member(path, extract_dir) {
            Ok(image) => image,
            Err(e) => {
                return SaveSource::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("{:#}", e),
                }
            }
        }
    } else {
        path.to_path_buf()
    };

    match check_image_size(&candidate) {
        Ok(()) => SaveSource::Found(candidate),
        Err(e) => SaveSource::Corrupt {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        },
    }
}

/// Probe the loose save directory. Only a non-empty directory counts.
pub fn probe_loose_dir(dir: Option<&Path>) -> Result<SaveSource> {
    let Some(dir) = dir else {
        return Ok(SaveSource::Absent);
    };
    if !dir.is_dir() {
        return Ok(SaveSource::Absent);
    }
    let empty = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .next()
        .is_none();
    Ok(if empty {
        SaveSource::Absent
    } else {
        SaveSource::Found(dir.to_path_buf())
    })
}

/// Probe the configured stock blank image.
pub fn probe_stock_image(path: Option<&Path>) -> SaveSource {
    let Some(path) = path else {
        return SaveSource::Absent;
    };
    if !path.is_file() {
        return SaveSource::Absent;
    }
    match check_image_size(path) {
        Ok(()) => SaveSource::Found(path.to_path_buf()),
        Err(e) => SaveSource::Corrupt {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        },
    }
}

/// Format `image` as a [`SAVE_SIZE`] ext4 partition seeded from `source`,
/// then normalize ownership and permissions.
pub fn format_save_image(
    backend: &dyn FilesystemImageBackend,
    source: &Path,
    image: &Path,
    owner: Owner,
) -> Result<()> {
    backend.create_blank(image, SAVE_SIZE)?;
    backend.format_ext4(source, image)?;
    check_image_size(image)?;
    normalize_image(backend, image, owner)?;
    Ok(())
}

/// Create `upper/`, `work/` and the placeholder file under `dir` if missing.
pub fn ensure_save_layout(dir: &Path) -> Result<()> {
    for name in OVERLAY_DIRS {
        let sub = dir.join(name);
        fs::create_dir_all(&sub)
            .with_context(|| format!("Failed to create directory {}", sub.display()))?;
    }
    let placeholder = dir.join(PLACEHOLDER);
    if !placeholder.exists() {
        fs::write(&placeholder, b"")
            .with_context(|| format!("Failed to create {}", placeholder.display()))?;
    }
    Ok(())
}

/// Generate an empty save partition at `output`.
pub fn generate_blank(
    backend: &dyn FilesystemImageBackend,
    owner: Owner,
    work: &WorkDir,
    output: &Path,
) -> Result<()> {
    let template = work.subdir("blank_template")?;
    ensure_save_layout(&template)?;
    chmod_tree(&template, SAVE_MODE)?;
    format_save_image(backend, &template, output, owner)?;
    info!("Generated blank save partition");
    Ok(())
}

/// Unwrap a usable source, recording a skipped one.
fn note(source: SaveSource, skipped: &mut Vec<SkippedSource>) -> Option<PathBuf> {
    match source {
        SaveSource::Found(path) => Some(path),
        SaveSource::Corrupt { path, reason } => {
            warn!("Ignoring {}: {}", path.display(), reason);
            skipped.push(SkippedSource { path, reason });
            None
        }
        SaveSource::Absent => None,
    }
}

fn adopt_image(
    backend: &dyn FilesystemImageBackend,
    candidate: &Path,
    output: &Path,
    owner: Owner,
) -> Result<()> {
    fs::copy(candidate, output).with_context(|| {
        format!("Error copying file {} to {}", candidate.display(), output.display())
    })?;
    if let Err(e) = normalize_image(backend, output, owner) {
        remove_if_exists(output)?;
        return Err(e);
    }
    Ok(())
}

fn check_image_size(path: &Path) -> Result<()> {
    let len = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    if len != SAVE_SIZE {
        bail!(
            "{} is {} bytes, a save partition must be exactly {} bytes",
            path.display(),
            len,
            SAVE_SIZE
        );
    }
    Ok(())
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove file {}", path.display()))?;
    }
    Ok(())
}
