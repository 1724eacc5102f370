//! Ownership and permission normalization for save partitions.
//!
//! The console performs save I/O as an unprivileged user, so every inode in
//! the partition must belong to that uid/gid and be world-writable. Images are
//! fixed up in place through the backend's inode editor; host trees that are
//! about to be formatted are opened up with a plain chmod.

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

use crate::backend::debugfs::S_IFMT;
use crate::backend::{FilesystemImageBackend, InodeEdit, InodeEntry, InodeField};
use crate::config::Owner;

/// Permission bits of every save-partition inode.
pub const SAVE_MODE: u32 = 0o777;

/// Edits needed to bring `entries` to `owner` and [`SAVE_MODE`].
///
/// Fields that already have the right value are left alone.
pub fn normalization_edits(entries: &[InodeEntry], owner: Owner) -> Vec<InodeEdit> {
    let mut edits = Vec::new();

    for entry in entries {
        let mode = (entry.mode & S_IFMT) | SAVE_MODE;
        if entry.mode != mode {
            edits.push(InodeEdit {
                path: entry.path.clone(),
                field: InodeField::Mode(mode),
            });
        }
        if entry.uid != owner.uid {
            edits.push(InodeEdit {
                path: entry.path.clone(),
                field: InodeField::Uid(owner.uid),
            });
        }
        if entry.gid != owner.gid {
            edits.push(InodeEdit {
                path: entry.path.clone(),
                field: InodeField::Gid(owner.gid),
            });
        }
    }

    edits
}

/// True if every entry already has `owner` and [`SAVE_MODE`].
pub fn is_normalized(entries: &[InodeEntry], owner: Owner) -> bool {
    normalization_edits(entries, owner).is_empty()
}

/// Rewrite uid, gid and mode of every inode in `image` without extracting it.
///
/// Returns the number of inodes inspected.
pub fn normalize_image(
    backend: &dyn FilesystemImageBackend,
    image: &Path,
    owner: Owner,
) -> Result<usize> {
    let entries = backend
        .list_tree(image)
        .with_context(|| format!("Failed to list inodes in {}", image.display()))?;
    let edits = normalization_edits(&entries, owner);

    info!(
        "Normalizing {} inodes in {} to {}:{} mode {:o} ({} edits)",
        entries.len(),
        image.display(),
        owner.uid,
        owner.gid,
        SAVE_MODE,
        edits.len()
    );
    backend.set_inode_fields(image, &edits)?;
    Ok(entries.len())
}

/// chmod every directory and file under `root` (and `root` itself) to `mode`.
///
/// Symlinks are skipped; their own mode is meaningless on Linux.
pub fn chmod_tree(root: &Path, mode: u32) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.path_is_symlink() {
            continue;
        }
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions: {}", entry.path().display()))?;
        count += 1;
    }
    Ok(count)
}
