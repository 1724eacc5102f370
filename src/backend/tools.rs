//! Backend that drives squashfs-tools and e2fsprogs as subprocesses.
//!
//! The argument lists here are what the console firmware has been validated
//! against; change them only together with a hardware test.

use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;

use super::debugfs::{self, InodeEdit, InodeEntry};
use super::FilesystemImageBackend;
use crate::config::{Owner, Tools};
use crate::layout::SQUASHFS_BLOCK_SIZE;
use crate::process::{Cmd, CommandResult};

/// [`FilesystemImageBackend`] backed by external tools.
#[derive(Debug, Clone, Default)]
pub struct ToolBackend {
    tools: Tools,
}

impl ToolBackend {
    pub fn new(tools: Tools) -> Self {
        Self { tools }
    }

    /// Run a single read-only debugfs request against an image.
    ///
    /// `fatal_lines` picks the fatal lines out of stderr.
    fn debugfs_request(
        &self,
        image: &Path,
        request: &OsStr,
        fatal_lines: fn(&str) -> Vec<&str>,
    ) -> Result<CommandResult> {
        let shown = request.to_string_lossy();
        let result = Cmd::new(&self.tools.debugfs)
            .arg("-R")
            .arg(request)
            .arg_path(image)
            .quiet()
            .error_msg(format!("debugfs '{}' failed on {}", shown, image.display()))
            .run()?;

        let errors = fatal_lines(&result.stderr);
        if let Some(err) = debugfs::format_error(image, &errors) {
            return Err(err.into());
        }
        if !errors.is_empty() {
            bail!(
                "debugfs '{}' failed on {}:\n{}",
                shown,
                image.display(),
                errors.join("\n")
            );
        }
        Ok(result)
    }
}

impl FilesystemImageBackend for ToolBackend {
    fn build_squashfs(&self, source: &Path, output: &Path, owner: Owner) -> Result<()> {
        // Remove existing if present
        if output.exists() {
            fs::remove_file(output)
                .with_context(|| format!("Failed to remove {}", output.display()))?;
        }

        Cmd::new(&self.tools.mksquashfs)
            .arg_path(source)
            .arg_path(output)
            .args(["-b", &SQUASHFS_BLOCK_SIZE.to_string()])
            .args(["-force-uid", &owner.uid.to_string()])
            .args(["-force-gid", &owner.gid.to_string()])
            .arg("-noappend") // Always create fresh
            .arg("-nopad") // Framing pads to 4K itself
            .error_msg("mksquashfs failed. Install squashfs-tools")
            .run()?;

        Ok(())
    }

    fn create_blank(&self, path: &Path, size: u64) -> Result<()> {
        Cmd::new(&self.tools.truncate)
            .args(["-s", &size.to_string()])
            .arg_path(path)
            .error_msg(format!("Failed to create blank file {}", path.display()))
            .run()?;
        Ok(())
    }

    fn format_ext4(&self, source: &Path, image: &Path) -> Result<()> {
        Cmd::new(&self.tools.mke2fs)
            .arg("-d")
            .arg_path(source)
            .args(["-t", "ext4"])
            .arg_path(image)
            .error_msg("mke2fs failed. Install e2fsprogs")
            .run()?;
        Ok(())
    }

    fn list_dir(&self, image: &Path, dir: &OsStr) -> Result<Vec<InodeEntry>> {
        let request = debugfs::request("ls -p", &[dir])?;
        let result = self.debugfs_request(image, &request, debugfs::error_lines)?;
        Ok(debugfs::parse_ls_p(&result.stdout_bytes, dir))
    }

    fn set_inode_fields(&self, image: &Path, edits: &[InodeEdit]) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }

        let mut script = tempfile::Builder::new()
            .prefix("uceforge-sif-")
            .suffix(".txt")
            .tempfile()
            .context("Failed to create debugfs command file")?;
        script
            .write_all(&debugfs::sif_script(edits)?)
            .context("Failed to write debugfs command file")?;
        script.flush()?;

        let result = Cmd::new(&self.tools.debugfs)
            .arg("-w")
            .arg("-f")
            .arg_path(script.path())
            .arg_path(image)
            .quiet()
            .error_msg(format!("debugfs failed to edit inodes in {}", image.display()))
            .run()?;

        let errors = debugfs::error_lines(&result.stderr);
        if let Some(err) = debugfs::format_error(image, &errors) {
            return Err(err.into());
        }
        if !errors.is_empty() {
            bail!(
                "debugfs reported errors while editing {}:\n{}",
                image.display(),
                errors.join("\n")
            );
        }

        info!("Rewrote {} inode fields in {}", edits.len(), image.display());
        Ok(())
    }

    fn dump_tree(&self, image: &Path, destination: &Path) -> Result<()> {
        fs::create_dir_all(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        let request = debugfs::request("rdump", &[OsStr::new("/"), destination.as_os_str()])?;
        // Unprivileged runs cannot restore ownership; callers chmod the tree afterwards
        self.debugfs_request(image, &request, debugfs::rdump_error_lines)?;
        Ok(())
    }
}
