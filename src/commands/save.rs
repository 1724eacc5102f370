//! Save commands - extract, replace and edit the save partition.

use anyhow::{Context, Result};
use log::warn;
use std::path::{Path, PathBuf};

use uceforge::backend::ToolBackend;
use uceforge::config::Config;
use uceforge::container;
use uceforge::edit::{self, ConsolePrompt, EditAction, EditStrategy};

/// Execute the extract-save command.
pub fn cmd_extract_save(container_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from("save.img"));
    container::extract_save(container_path, &output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

/// Execute the replace-save command.
pub fn cmd_replace_save(container_path: &Path, image: &Path, backup: bool) -> Result<()> {
    if !image.is_file() {
        anyhow::bail!("Replacement image {} not found", image.display());
    }
    container::replace_save(container_path, image, backup)?;
    println!("Replaced save partition of {}", container_path.display());
    Ok(())
}

/// What `edit-save` should do with the tree.
pub enum EditRequest {
    /// Open a file manager (explicit choice, or auto-detected)
    Interactive { file_manager: Option<String> },
    /// Copy one file into the tree
    Apply { source: PathBuf, destination: PathBuf },
}

/// Execute the edit-save command.
pub fn cmd_edit_save(
    container_path: &Path,
    strategy: EditStrategy,
    backup: bool,
    request: EditRequest,
    config: &Config,
) -> Result<()> {
    let strategy = match strategy {
        EditStrategy::Mount => match edit::mount::check_supported() {
            Ok(()) => EditStrategy::Mount,
            Err(e) => {
                warn!("{:#}; falling back to the offline strategy", e);
                EditStrategy::Offline
            }
        },
        EditStrategy::Offline => EditStrategy::Offline,
    };

    let backend = ToolBackend::new(config.tools.clone());
    match request {
        EditRequest::Interactive { file_manager } => {
            let program =
                edit::select_file_manager(file_manager.as_deref(), config.file_manager.as_deref())
                    .context("Cannot edit interactively")?;
            let action = EditAction::OpenFileManager(program);
            edit::edit_save(
                &backend,
                config,
                container_path,
                strategy,
                backup,
                &action,
                &mut ConsolePrompt,
            )?;
        }
        EditRequest::Apply {
            source,
            destination,
        } => {
            let action = EditAction::ApplyFile {
                source,
                destination,
            };
            // Nothing for the user to do
            let mut no_wait = |_: &Path| -> Result<()> { Ok(()) };
            edit::edit_save(
                &backend,
                config,
                container_path,
                strategy,
                backup,
                &action,
                &mut no_wait,
            )?;
        }
    }

    println!("Updated save partition of {}", container_path.display());
    Ok(())
}
