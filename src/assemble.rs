//! Composite image assembler.
//!
//! Build order:
//! 1. Stage a copy of the input tree, harvesting save inputs
//! 2. squashfs the copy into the working file, pad, append its digest
//! 3. Append the reserved block
//! 4. Build the save partition, append its digest, append the image
//! 5. Copy the working file to the output
//!
//! The working file lives in the build's [`WorkDir`], so a failed build never
//! leaves a partial container at the output path.

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::FilesystemImageBackend;
use crate::config::Config;
use crate::framer::{self, hex, RawDigest};
use crate::layout::container_len;
use crate::save::{self, SaveKind, SkippedSource};
use crate::squashfs::create_squashfs;
use crate::staging;
use crate::timing::Timer;
use crate::workdir::WorkDir;

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    /// squashfs blob size before padding
    pub fs_len: u64,
    /// fs region size after padding
    pub fs_region_len: u64,
    pub total_len: u64,
    pub save_kind: SaveKind,
    /// Save sources that were present but unusable
    pub skipped_save_sources: Vec<SkippedSource>,
    #[serde(serialize_with = "serialize_digest")]
    pub fs_digest: RawDigest,
    #[serde(serialize_with = "serialize_digest")]
    pub save_digest: RawDigest,
}

fn serialize_digest<S: serde::Serializer>(digest: &RawDigest, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex(digest))
}

/// Build a container from `staged_dir` and write it to `output`.
pub fn build(
    backend: &dyn FilesystemImageBackend,
    config: &Config,
    staged_dir: &Path,
    output: &Path,
) -> Result<BuildReport> {
    let total = Timer::start("Build");
    let work = WorkDir::new("build")?;

    let timer = Timer::start("Staging");
    let tree = staging::prepare(staged_dir, &work)?;
    timer.finish();

    let working = work.join("container.uce");

    let timer = Timer::start("Filesystem");
    let fs_len = create_squashfs(backend, &tree.data_dir, &working, config.fs_owner)?;
    let fs_region_len = framer::pad_to_alignment(&working)?;
    let fs_digest = framer::append_digest_of(&working, &working)?;
    framer::append_reserved(&working)?;
    timer.finish();

    let timer = Timer::start("Save partition");
    let partition = save::build_save_partition(backend, config, &tree.save_inputs, &work)?;
    let save_digest = framer::append_digest_of(&partition.image, &working)?;
    framer::append_file(&working, &partition.image)?;
    timer.finish();

    let total_len = fs::metadata(&working)
        .with_context(|| format!("Failed to stat {}", working.display()))?
        .len();
    debug_assert_eq!(total_len, container_len(fs_len));

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::copy(&working, output).with_context(|| {
        format!("Error copying file {} to {}", working.display(), output.display())
    })?;

    info!(
        "Created {} ({} bytes, save from {})",
        output.display(),
        total_len,
        partition.kind
    );
    total.finish();

    Ok(BuildReport {
        output: output.to_path_buf(),
        fs_len,
        fs_region_len,
        total_len,
        save_kind: partition.kind,
        skipped_save_sources: partition.skipped,
        fs_digest,
        save_digest,
    })
}
