//! Loop-mount edit strategy.

use anyhow::{bail, Result};
use log::{info, warn};
use std::path::Path;

use super::{ContinuePrompt, EditAction};
use crate::backend::FilesystemImageBackend;
use crate::config::Owner;
use crate::process::Cmd;
use crate::save::normalize_image;
use crate::workdir::WorkDir;

/// Fail unless loop mounts are possible: Linux, effective uid 0.
pub fn check_supported() -> Result<()> {
    if !cfg!(target_os = "linux") {
        bail!("The mount strategy requires Linux; use --strategy offline");
    }
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        bail!(
            "The mount strategy must run as root (effective uid is {}); use --strategy offline",
            euid
        );
    }
    Ok(())
}

/// Mount `image`, run `action` on it, unmount, then fix ownership of anything added.
pub fn edit(
    backend: &dyn FilesystemImageBackend,
    owner: Owner,
    image: &Path,
    work: &WorkDir,
    action: &EditAction,
    prompt: &mut dyn ContinuePrompt,
) -> Result<()> {
    check_supported()?;
    let mount_point = work.subdir("mnt")?;

    Cmd::new("mount")
        .args(["-o", "loop"])
        .arg_path(image)
        .arg_path(&mount_point)
        .error_msg(format!("Failed to mount {}", image.display()))
        .run()?;
    info!("Mounted {} at {}", image.display(), mount_point.display());

    let edited = action.perform(&mount_point).and_then(|()| {
        if action.is_interactive() {
            prompt.wait(&mount_point)
        } else {
            Ok(())
        }
    });

    // Always unmount, even if the action failed
    let unmounted = Cmd::new("umount")
        .arg_path(&mount_point)
        .error_msg(format!("Failed to unmount {}", mount_point.display()))
        .run();
    if let Err(ref e) = unmounted {
        warn!("{:#}", e);
    }

    edited?;
    unmounted?;

    normalize_image(backend, image, owner)?;
    Ok(())
}
