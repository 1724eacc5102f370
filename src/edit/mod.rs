//! Save-partition editor.
//!
//! The save region is split out of the container into a scratch image,
//! edited with one of two strategies, and spliced back with
//! [`container::rebuild`]:
//!
//! - [`EditStrategy::Mount`] loop-mounts the image (Linux, root only)
//! - [`EditStrategy::Offline`] dumps the tree with debugfs and reformats
//!   a fresh image from the edited copy afterwards

pub mod mount;
pub mod offline;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fmt;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Component, Path, PathBuf};

use crate::backend::FilesystemImageBackend;
use crate::config::{Config, KNOWN_FILE_MANAGERS};
use crate::container;
use crate::process::{self, Cmd};
use crate::workdir::WorkDir;

/// How the save tree is made editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EditStrategy {
    /// Loop-mount the image (requires root on Linux)
    Mount,
    /// Extract with debugfs and reformat afterwards
    Offline,
}

impl fmt::Display for EditStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditStrategy::Mount => write!(f, "mount"),
            EditStrategy::Offline => write!(f, "offline"),
        }
    }
}

/// What to do with the editable save tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    /// Open the tree in this file manager
    OpenFileManager(String),
    /// Copy `source` to `destination`, relative to the save root
    ApplyFile {
        source: PathBuf,
        destination: PathBuf,
    },
}

impl EditAction {
    /// Check the action can run before anything is extracted.
    pub fn validate(&self) -> Result<()> {
        match self {
            EditAction::OpenFileManager(program) => {
                if !process::exists(program) {
                    bail!("File manager '{}' not found in PATH", program);
                }
            }
            EditAction::ApplyFile {
                source,
                destination,
            } => {
                if !source.is_file() {
                    bail!("{} is not a file", source.display());
                }
                let escapes = destination
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
                if escapes || destination.as_os_str().is_empty() {
                    bail!(
                        "Destination {} must be a relative path inside the save partition",
                        destination.display()
                    );
                }
            }
        }
        Ok(())
    }

    /// True if the user works on the tree and must signal when done.
    pub fn is_interactive(&self) -> bool {
        matches!(self, EditAction::OpenFileManager(_))
    }

    /// Run the action against the tree rooted at `root`.
    pub fn perform(&self, root: &Path) -> Result<()> {
        match self {
            EditAction::OpenFileManager(program) => {
                info!("Opening {} in {}", root.display(), program);
                // The file manager may outlive the edit; it is not waited on
                Cmd::new(program).arg_path(root).spawn()?;
            }
            EditAction::ApplyFile {
                source,
                destination,
            } => {
                let target = root.join(destination);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory {}", parent.display())
                    })?;
                }
                fs::copy(source, &target).with_context(|| {
                    format!("Error copying file {} to {}", source.display(), target.display())
                })?;
                info!("Copied {} to {}", source.display(), destination.display());
            }
        }
        Ok(())
    }
}

/// Blocks until the user has finished editing the tree at the given path.
pub trait ContinuePrompt {
    fn wait(&mut self, tree: &Path) -> Result<()>;
}

impl<F> ContinuePrompt for F
where
    F: FnMut(&Path) -> Result<()>,
{
    fn wait(&mut self, tree: &Path) -> Result<()> {
        self(tree)
    }
}

/// Waits for Enter on stdin.
pub struct ConsolePrompt;

impl ContinuePrompt for ConsolePrompt {
    fn wait(&mut self, tree: &Path) -> Result<()> {
        print!(
            "Edit the save files in {}, then press Enter to continue...",
            tree.display()
        );
        io::stdout().flush().context("Failed to flush stdout")?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(())
    }
}

/// Pick a file manager: explicit choice, then configured, then the first known one on PATH.
pub fn select_file_manager(explicit: Option<&str>, configured: Option<&str>) -> Result<String> {
    if let Some(program) = explicit {
        if !process::exists(program) {
            bail!("File manager '{}' not found in PATH", program);
        }
        return Ok(program.to_string());
    }

    if let Some(program) = configured {
        if process::exists(program) {
            return Ok(program.to_string());
        }
        warn!(
            "Configured file manager '{}' not found in PATH, auto-detecting",
            program
        );
    }

    KNOWN_FILE_MANAGERS
        .iter()
        .find(|program| process::exists(program))
        .map(|program| program.to_string())
        .with_context(|| {
            format!(
                "No file manager found in PATH (tried {}); set UCE_FILE_MANAGER",
                KNOWN_FILE_MANAGERS.join(", ")
            )
        })
}

/// Edit the save partition of the container at `path` in place.
pub fn edit_save(
    backend: &dyn FilesystemImageBackend,
    config: &Config,
    path: &Path,
    strategy: EditStrategy,
    backup: bool,
    action: &EditAction,
    prompt: &mut dyn ContinuePrompt,
) -> Result<()> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }
    if strategy == EditStrategy::Mount {
        mount::check_supported()?;
    }
    action.validate()?;

    let work = WorkDir::new("edit")?;
    let parts = container::split(path)?;
    if backup {
        container::backup(path)?;
    }

    let image = work.join("save.img");
    fs::write(&image, &parts.save)
        .with_context(|| format!("Failed to write {}", image.display()))?;
    info!("Editing save partition of {} ({} strategy)", path.display(), strategy);

    match strategy {
        EditStrategy::Mount => {
            mount::edit(backend, config.save_owner, &image, &work, action, prompt)?
        }
        EditStrategy::Offline => {
            offline::edit(backend, config.save_owner, &image, &work, action, prompt)?
        }
    }

    container::rebuild(path, &parts.prefix, &image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("retroarch.cfg");
        fs::write(&source, b"video_smooth = true\n").unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();

        let action = EditAction::ApplyFile {
            source,
            destination: PathBuf::from("upper/.config/retroarch/retroarch.cfg"),
        };
        action.validate().unwrap();
        action.perform(&root).unwrap();

        assert_eq!(
            fs::read(root.join("upper/.config/retroarch/retroarch.cfg")).unwrap(),
            b"video_smooth = true\n"
        );
        assert!(!action.is_interactive());
    }

    #[test]
    fn test_apply_file_rejects_escaping_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.cfg");
        fs::write(&source, b"x").unwrap();

        for dest in ["../etc/passwd", "/upper/a.cfg", ""] {
            let action = EditAction::ApplyFile {
                source: source.clone(),
                destination: PathBuf::from(dest),
            };
            assert!(action.validate().is_err(), "{}", dest);
        }
    }

    #[test]
    fn test_missing_explicit_file_manager() {
        let err = select_file_manager(Some("no-such-file-manager-xyz"), None).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_closure_prompt() {
        let mut seen = Vec::new();
        let mut prompt = |tree: &Path| -> Result<()> {
            seen.push(tree.to_path_buf());
            Ok(())
        };
        prompt.wait(Path::new("/tmp/tree")).unwrap();
        assert_eq!(seen, vec![PathBuf::from("/tmp/tree")]);
    }

    #[test]
    fn test_edit_requires_container() {
        let config = Config::from_vars(Vec::new());
        let backend = crate::backend::ToolBackend::new(config.tools.clone());
        let action = EditAction::OpenFileManager("true".to_string());
        let err = edit_save(
            &backend,
            &config,
            Path::new("/nonexistent/game.uce"),
            EditStrategy::Offline,
            false,
            &action,
            &mut |_: &Path| -> Result<()> { Ok(()) },
        )
        .unwrap_err();
        assert!(err.to_string().contains("is not a file"));
    }
}
