//! Save archives (`save.zip`).

use anyhow::{bail, Context, Result};
use log::info;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::staging::SAVE_FILE_STEM;

/// Extract the first `save.*` member of `archive` into `dest_dir`.
///
/// Fails if the archive is unreadable or has no such member.
pub fn extract_save_member(archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid zipfile", archive.display()))?;

    for index in 0..zip.len() {
        let mut member = zip
            .by_index(index)
            .with_context(|| format!("Failed to read member {} of {}", index, archive.display()))?;
        if member.is_dir() {
            continue;
        }
        let Some(name) = member.enclosed_name() else {
            continue;
        };
        if name.file_stem() != Some(OsStr::new(SAVE_FILE_STEM)) {
            continue;
        }
        let Some(file_name) = name.file_name().map(|n| n.to_os_string()) else {
            continue;
        };

        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create directory {}", dest_dir.display()))?;
        let dest = dest_dir.join(&file_name);
        let mut out =
            File::create(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;
        io::copy(&mut member, &mut out).with_context(|| {
            format!(
                "Unable to extract {} from {}",
                file_name.to_string_lossy(),
                archive.display()
            )
        })?;

        info!(
            "Extracted {} from {}",
            file_name.to_string_lossy(),
            archive.display()
        );
        return Ok(dest);
    }

    bail!(
        "{} does not contain a file named {}.*",
        archive.display(),
        SAVE_FILE_STEM
    )
}
