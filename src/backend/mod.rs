//! Filesystem image backends.
//!
//! Everything that actually produces or inspects a squashfs blob or an ext4
//! image goes through [`FilesystemImageBackend`]. The container framing code
//! never touches a filesystem format directly, so [`ToolBackend`] (which
//! shells out to squashfs-tools and e2fsprogs) can be swapped for a native
//! implementation or a test double.

pub mod debugfs;
pub mod tools;

use anyhow::Result;
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::Path;

use crate::config::Owner;

pub use debugfs::{ImageFormatError, InodeEdit, InodeEntry, InodeField};
pub use tools::ToolBackend;

/// Producer and inspector of the two filesystem formats in a container.
pub trait FilesystemImageBackend {
    /// Compress `source` into a squashfs blob at `output`.
    ///
    /// Symlinks are preserved, blocks are 262144 bytes, every entry is owned
    /// by `owner`, and the blob is not padded.
    fn build_squashfs(&self, source: &Path, output: &Path, owner: Owner) -> Result<()>;

    /// Create a zero-filled file of exactly `size` bytes.
    fn create_blank(&self, path: &Path, size: u64) -> Result<()>;

    /// Format `image` as ext4, seeded with the contents of `source`.
    fn format_ext4(&self, source: &Path, image: &Path) -> Result<()>;

    /// List the entries of one directory inside an ext4 image.
    ///
    /// Fails with [`ImageFormatError`] if `image` is not an ext4 filesystem.
    fn list_dir(&self, image: &Path, dir: &OsStr) -> Result<Vec<InodeEntry>>;

    /// Rewrite inode fields in place, without mounting.
    fn set_inode_fields(&self, image: &Path, edits: &[InodeEdit]) -> Result<()>;

    /// Dump the whole tree of an ext4 image into `destination`.
    fn dump_tree(&self, image: &Path, destination: &Path) -> Result<()>;

    /// Every inode reachable from the root, root first, breadth-first.
    fn list_tree(&self, image: &Path) -> Result<Vec<InodeEntry>> {
        let mut all = Vec::new();
        let mut pending = VecDeque::from([OsString::from("/")]);

        while let Some(dir) = pending.pop_front() {
            for entry in self.list_dir(image, &dir)? {
                if entry.is_dir() && entry.path != "/" {
                    pending.push_back(entry.path.clone());
                }
                all.push(entry);
            }
        }

        Ok(all)
    }
}
