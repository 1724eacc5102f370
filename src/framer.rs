//! Alignment and checksum framing.
//!
//! The working container file is only ever appended to: padding, then the
//! fs digest, then the reserved block, then the save digest, then the save
//! image. A digest is always computed over bytes that are already on disk and
//! appended after them, so it is never part of its own input.

use anyhow::{Context, Result};
use log::info;
use md5::{Digest, Md5};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::layout::{pad_length, RESERVED_LEN};

/// Raw MD5 digest as embedded in a container.
pub type RawDigest = [u8; 16];

/// MD5 of a byte slice.
pub fn md5_bytes(data: &[u8]) -> RawDigest {
    to_raw(&Md5::digest(data))
}

/// MD5 of a file's contents, streamed.
pub fn md5_file(path: &Path) -> Result<RawDigest> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    md5_reader(&mut file).with_context(|| format!("Failed to read {} for hashing", path.display()))
}

/// MD5 of everything `reader` yields.
pub fn md5_reader<R: Read>(reader: &mut R) -> io::Result<RawDigest> {
    let mut hasher = Md5::new();
    io::copy(reader, &mut hasher)?;
    Ok(to_raw(&hasher.finalize()))
}

fn to_raw(output: &[u8]) -> RawDigest {
    let mut digest = [0u8; 16];
    digest.copy_from_slice(output);
    digest
}

/// Lowercase hex rendering of a digest, for logs.
pub fn hex(digest: &RawDigest) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Append raw bytes to a file.
pub fn append_bytes(target: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(target)
        .with_context(|| format!("Failed to open {} for appending", target.display()))?;
    file.write_all(data)
        .with_context(|| format!("Failed to append to {}", target.display()))?;
    Ok(())
}

/// Append the full contents of `source` to `target`.
pub fn append_file(target: &Path, source: &Path) -> Result<()> {
    let mut input = File::open(source)
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let mut output = OpenOptions::new()
        .append(true)
        .open(target)
        .with_context(|| format!("Failed to open {} for appending", target.display()))?;
    io::copy(&mut input, &mut output).with_context(|| {
        format!("Failed to append {} to {}", source.display(), target.display())
    })?;
    Ok(())
}

/// Zero-pad `file` to the next 4096-byte boundary. Returns the padded length.
pub fn pad_to_alignment(file: &Path) -> Result<u64> {
    let len = fs::metadata(file)
        .with_context(|| format!("Failed to stat {}", file.display()))?
        .len();
    let count = pad_length(len);
    info!("Appending {} bytes to {}", count, file.display());
    append_bytes(file, &vec![0u8; count as usize])?;
    Ok(len + count)
}

/// Compute the digest of `source` and append it, raw, to `target`.
pub fn append_digest_of(source: &Path, target: &Path) -> Result<RawDigest> {
    let digest = md5_file(source)?;
    info!("md5 of {} is {}", source.display(), hex(&digest));
    append_bytes(target, &digest)?;
    Ok(digest)
}

/// Append the 32-byte zero block.
pub fn append_reserved(target: &Path) -> Result<()> {
    append_bytes(target, &[0u8; RESERVED_LEN as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_md5_known_value() {
        assert_eq!(hex(&md5_bytes(b"")), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hex(&md5_bytes(b"abc")), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_md5_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();
        assert_eq!(md5_file(&path).unwrap(), md5_bytes(&data));
    }

    #[test]
    fn test_pad_to_alignment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, vec![0xAAu8; 5000]).unwrap();

        let padded = pad_to_alignment(&path).unwrap();
        assert_eq!(padded, 8192);

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 8192);
        assert!(data[..5000].iter().all(|&b| b == 0xAA));
        assert!(data[5000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pad_already_aligned_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, vec![1u8; 4096]).unwrap();
        assert_eq!(pad_to_alignment(&path).unwrap(), 4096);
        assert_eq!(fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_digest_appended_after_its_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, b"squashfs").unwrap();

        let digest = append_digest_of(&path, &path).unwrap();
        append_reserved(&path).unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 8 + 16 + 32);
        assert_eq!(&data[8..24], &md5_bytes(b"squashfs"));
        assert_eq!(&data[8..24], &digest);
        assert!(data[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"head").unwrap();
        fs::write(&b, b"tail").unwrap();
        append_file(&a, &b).unwrap();
        assert_eq!(fs::read(&a).unwrap(), b"headtail");
    }
}
