//! UCE container byte layout.
//!
//! ```text
//! +----------------------+  0
//! | fs_region            |  squashfs blob, zero-padded to 4096
//! +----------------------+  fs_region_len
//! | fs_digest   (16)     |  raw MD5 of fs_region
//! | reserved    (32)     |  zeros
//! | save_digest (16)     |  raw MD5 of save_region at build time
//! +----------------------+  fs_region_len + 64
//! | save_region          |  ext4 image, SAVE_SIZE bytes
//! +----------------------+  len
//! ```
//!
//! There is no magic number or length field. The save region is found purely
//! by its fixed size at the end of the file, which is what the firmware does.

use anyhow::{bail, Result};
use serde::Serialize;

/// Alignment of the squashfs region.
pub const FS_ALIGNMENT: u64 = 4096;

/// Size of the ext4 save partition at the end of every container.
pub const SAVE_SIZE: u64 = 4_194_304;

/// Length of a raw MD5 digest.
pub const DIGEST_LEN: u64 = 16;

/// Zero block between the fs digest and the save digest.
pub const RESERVED_LEN: u64 = 32;

/// Everything between the fs region and the save region.
pub const HEADER_LEN: u64 = DIGEST_LEN + RESERVED_LEN + DIGEST_LEN;

/// Squashfs block size expected by the firmware.
pub const SQUASHFS_BLOCK_SIZE: u32 = 262_144;

/// Number of zero bytes needed to bring `n` up to the next 4096 boundary.
pub fn pad_length(n: u64) -> u64 {
    aligned_len(n) - n
}

/// `n` rounded up to the next 4096 boundary.
pub fn aligned_len(n: u64) -> u64 {
    n.div_ceil(FS_ALIGNMENT) * FS_ALIGNMENT
}

/// Total container size for an unpadded squashfs blob of `fs_blob_len` bytes.
pub fn container_len(fs_blob_len: u64) -> u64 {
    aligned_len(fs_blob_len) + HEADER_LEN + SAVE_SIZE
}

/// Field offsets of a container, derived from its total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerLayout {
    pub total_len: u64,
    pub fs_region_len: u64,
    pub fs_digest_offset: u64,
    pub reserved_offset: u64,
    pub save_digest_offset: u64,
    pub save_offset: u64,
}

impl ContainerLayout {
    /// Compute the layout of a container of `total_len` bytes.
    pub fn from_len(total_len: u64) -> Result<Self> {
        if total_len < HEADER_LEN + SAVE_SIZE {
            bail!(
                "Container is {} bytes, smaller than the {} byte header and save partition",
                total_len,
                HEADER_LEN + SAVE_SIZE
            );
        }

        let fs_region_len = total_len - HEADER_LEN - SAVE_SIZE;
        if fs_region_len % FS_ALIGNMENT != 0 {
            bail!(
                "Filesystem region is {} bytes, not a multiple of {}",
                fs_region_len,
                FS_ALIGNMENT
            );
        }

        Ok(Self {
            total_len,
            fs_region_len,
            fs_digest_offset: fs_region_len,
            reserved_offset: fs_region_len + DIGEST_LEN,
            save_digest_offset: fs_region_len + DIGEST_LEN + RESERVED_LEN,
            save_offset: fs_region_len + HEADER_LEN,
        })
    }

    /// Length of the immutable prefix (everything before the save region).
    pub fn prefix_len(&self) -> u64 {
        self.save_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_length() {
        assert_eq!(pad_length(0), 0);
        assert_eq!(pad_length(1), 4095);
        assert_eq!(pad_length(4095), 1);
        assert_eq!(pad_length(4096), 0);
        assert_eq!(pad_length(4097), 4095);
    }

    #[test]
    fn test_pad_length_always_aligns() {
        for n in [3u64, 100, 8191, 12_288, 262_145, 1_000_003] {
            let pad = pad_length(n);
            assert!(pad < FS_ALIGNMENT);
            assert_eq!((n + pad) % FS_ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_header_is_64_bytes() {
        assert_eq!(HEADER_LEN, 64);
    }

    #[test]
    fn test_container_len() {
        assert_eq!(container_len(10), 4096 + 64 + SAVE_SIZE);
        assert_eq!(container_len(8192), 8192 + 64 + SAVE_SIZE);
    }

    #[test]
    fn test_layout_offsets() {
        let layout = ContainerLayout::from_len(container_len(5000)).unwrap();
        assert_eq!(layout.fs_region_len, 8192);
        assert_eq!(layout.fs_digest_offset, 8192);
        assert_eq!(layout.reserved_offset, 8208);
        assert_eq!(layout.save_digest_offset, 8240);
        assert_eq!(layout.save_offset, 8256);
        assert_eq!(layout.prefix_len() + SAVE_SIZE, layout.total_len);
    }

    #[test]
    fn test_layout_rejects_short_input() {
        assert!(ContainerLayout::from_len(SAVE_SIZE).is_err());
        assert!(ContainerLayout::from_len(0).is_err());
    }

    #[test]
    fn test_layout_rejects_unaligned_fs_region() {
        assert!(ContainerLayout::from_len(HEADER_LEN + SAVE_SIZE + 100).is_err());
    }

    #[test]
    fn test_layout_allows_empty_fs_region() {
        let layout = ContainerLayout::from_len(HEADER_LEN + SAVE_SIZE).unwrap();
        assert_eq!(layout.fs_region_len, 0);
    }
}
