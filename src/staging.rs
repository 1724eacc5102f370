//! Staging preparation.
//!
//! The caller's staged directory is never modified. It is copied into the
//! build's scratch area, normalized, and any save inputs are moved out of the
//! copy so the read-only region always ships an empty save mount point.
//!
//! ```text
//! <staged>/
//! ├── exec.sh              # launcher, forced to 0755
//! ├── title.png -> boxart/boxart.png
//! ├── boxart/boxart.png
//! ├── emu/<core>.so
//! ├── roms/<rom>
//! ├── save/                # mount point; may hold save.* or loose files
//! └── save.*               # optional single save file
//! ```

use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::workdir::{reset_dir, WorkDir};

pub const LAUNCHER: &str = "exec.sh";
pub const COVER_ART: &str = "boxart/boxart.png";
pub const COVER_LINK: &str = "title.png";
pub const SAVE_DIR: &str = "save";

/// Stem shared by every single-file save input (`save.img`, `save.zip`, ...).
pub const SAVE_FILE_STEM: &str = "save";

/// Save inputs moved out of the staging copy.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SaveInputs {
    /// A `save.*` file from `save/` or the staged root
    pub save_file: Option<PathBuf>,
    /// Remaining non-empty contents of `save/`
    pub loose_dir: Option<PathBuf>,
}

/// A prepared copy of the staged directory.
#[derive(Debug)]
pub struct StagedTree {
    /// Tree handed to the filesystem builder
    pub data_dir: PathBuf,
    pub save_inputs: SaveInputs,
}

/// Copy `staged_dir` into `work` and prepare it for packing.
pub fn prepare(staged_dir: &Path, work: &WorkDir) -> Result<StagedTree> {
    if !staged_dir.is_dir() {
        bail!("{} is not a valid directory", staged_dir.display());
    }
    if !staged_dir.join(LAUNCHER).is_file() {
        bail!(
            "Directory {} does not contain a file named {}",
            staged_dir.display(),
            LAUNCHER
        );
    }

    let data_dir = work.join("data");
    copy_dir_recursive(staged_dir, &data_dir)?;
    info!("Copied {} to {}", staged_dir.display(), data_dir.display());

    make_executable(&data_dir.join(LAUNCHER))?;
    relink_cover_art(&data_dir)?;

    let inputs_dir = work.subdir("save_inputs")?;
    let save_inputs = harvest_save_inputs(&data_dir, &inputs_dir)?;

    Ok(StagedTree {
        data_dir,
        save_inputs,
    })
}

/// Find a `save.*` file: `save/` first, then the root.
pub fn find_save_file(data_dir: &Path) -> Option<PathBuf> {
    [data_dir.join(SAVE_DIR), data_dir.to_path_buf()]
        .into_iter()
        .find_map(|dir| find_save_file_in(&dir))
}

fn find_save_file_in(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && !path.is_symlink()
                && path.extension().is_some()
                && path.file_stem().is_some_and(|stem| stem == SAVE_FILE_STEM)
        })
        .collect();
    // Deterministic choice if several exist
    candidates.sort();
    candidates.into_iter().next()
}

/// Move save inputs out of `data_dir` into `inputs_dir`, leaving an empty `save/`.
pub fn harvest_save_inputs(data_dir: &Path, inputs_dir: &Path) -> Result<SaveInputs> {
    let mut inputs = SaveInputs::default();

    if let Some(save_file) = find_save_file(data_dir) {
        let name = save_file
            .file_name()
            .context("save file has no name")?;
        let dest = inputs_dir.join(name);
        move_path(&save_file, &dest)?;
        info!("Found save file {}", name.to_string_lossy());
        inputs.save_file = Some(dest);
    }

    let save_dir = data_dir.join(SAVE_DIR);
    if save_dir.is_dir() && !is_dir_empty(&save_dir)? {
        let dest = inputs_dir.join("loose");
        move_path(&save_dir, &dest)?;
        info!("Custom save data found in {}/", SAVE_DIR);
        inputs.loose_dir = Some(dest);
    }

    reset_dir(&save_dir)?;
    Ok(inputs)
}

/// Replace the cover link with a relative symlink to the cover art.
fn relink_cover_art(data_dir: &Path) -> Result<()> {
    let link = data_dir.join(COVER_LINK);
    if !data_dir.join(COVER_ART).is_file() {
        return Ok(());
    }

    if link.is_symlink() || link.exists() {
        fs::remove_file(&link)
            .with_context(|| format!("Failed to remove file {}", link.display()))?;
    }
    symlink(COVER_ART, &link).with_context(|| {
        format!(
            "Failed to create symlink {} to target {}",
            link.display(),
            COVER_ART
        )
    })?;
    Ok(())
}

/// Make a file executable (chmod 755).
pub fn make_executable(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    Ok(())
}

/// Copy a directory recursively, recreating symlinks instead of following them.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            symlink(&target, &dest_path).with_context(|| {
                format!("Failed to create symlink {}", dest_path.display())
            })?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path).with_context(|| {
                format!(
                    "Error copying file {} to {}",
                    path.display(),
                    dest_path.display()
                )
            })?;
        }
    }

    Ok(())
}

fn is_dir_empty(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .next()
        .is_none())
}

/// Rename, falling back to copy + delete across filesystems.
fn move_path(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    if from.is_dir() {
        copy_dir_recursive(from, to)?;
        fs::remove_dir_all(from)
            .with_context(|| format!("Failed to remove directory {}", from.display()))?;
    } else {
        fs::copy(from, to).with_context(|| {
            format!("Error copying file {} to {}", from.display(), to.display())
        })?;
        fs::remove_file(from).with_context(|| format!("Failed to remove file {}", from.display()))?;
    }
    Ok(())
}
