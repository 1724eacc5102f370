//! Offline edit strategy: dump, edit, reformat.

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use super::{ContinuePrompt, EditAction};
use crate::backend::FilesystemImageBackend;
use crate::config::Owner;
use crate::save::{chmod_tree, ensure_save_layout, format_save_image, SAVE_MODE};
use crate::workdir::WorkDir;

/// Created by mke2fs; never carried over from a dump.
const LOST_AND_FOUND: &str = "lost+found";

/// Replace `image` with a fresh partition built from an edited copy of its tree.
pub fn edit(
    backend: &dyn FilesystemImageBackend,
    owner: Owner,
    image: &Path,
    work: &WorkDir,
    action: &EditAction,
    prompt: &mut dyn ContinuePrompt,
) -> Result<()> {
    let tree = work.subdir("save_tree")?;
    backend.dump_tree(image, &tree)?;
    chmod_tree(&tree, SAVE_MODE)?;
    info!("Extracted save partition to {}", tree.display());

    action.perform(&tree)?;
    prompt.wait(&tree)?;

    fs::remove_file(image)
        .with_context(|| format!("Failed to remove file {}", image.display()))?;

    let lost_and_found = tree.join(LOST_AND_FOUND);
    if lost_and_found.is_dir() {
        fs::remove_dir_all(&lost_and_found).with_context(|| {
            format!("Failed to remove directory {}", lost_and_found.display())
        })?;
    }

    ensure_save_layout(&tree)?;
    chmod_tree(&tree, SAVE_MODE)?;
    format_save_image(backend, &tree, image, owner)?;
    info!("Rebuilt save partition from {}", tree.display());
    Ok(())
}
