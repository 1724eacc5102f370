//! debugfs output parsing and command scripts.
//!
//! `ls -p` prints one machine-readable line per directory entry:
//!
//! ```text
//! /<inode>/<mode, octal>/<uid>/<gid>/<name>/<size>/
//! ```
//!
//! Directories print an empty size field (`.../name//`).

use anyhow::{bail, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// File-type bits of an inode mode.
pub const S_IFMT: u32 = 0o170_000;
/// Directory file type.
pub const S_IFDIR: u32 = 0o040_000;

/// One inode as listed inside an ext4 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeEntry {
    pub inode: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Absolute path inside the image ("/" for the root directory).
    /// ext4 names are arbitrary bytes, so this is not necessarily UTF-8.
    pub path: OsString,
    pub size: Option<u64>,
}

impl InodeEntry {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Permission bits without the file type.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// An inode field rewrite, applied with debugfs `sif`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeField {
    Mode(u32),
    Uid(u32),
    Gid(u32),
}

/// A single `sif` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeEdit {
    pub path: OsString,
    pub field: InodeField,
}

/// The file handed to the backend is not an ext4 filesystem it can open.
///
/// Distinguishes a malformed save image from a failing or missing tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFormatError {
    pub image: PathBuf,
    pub detail: String,
}

impl fmt::Display for ImageFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a usable ext4 image: {}", self.image.display(), self.detail)
    }
}

impl std::error::Error for ImageFormatError {}

/// debugfs messages that mean the image itself is bad.
const FORMAT_ERRORS: &[&str] = &[
    "Bad magic number in super-block",
    "Can't find valid filesystem superblock",
    "Superblock checksum does not match",
    "Filesystem revision too high",
    "short read",
    "Corrupt extent header",
];

/// The format error among debugfs error lines, if any.
pub fn format_error(image: &Path, errors: &[&str]) -> Option<ImageFormatError> {
    errors
        .iter()
        .find(|line| FORMAT_ERRORS.iter().any(|marker| line.contains(marker)))
        .map(|line| ImageFormatError {
            image: image.to_path_buf(),
            detail: line.to_string(),
        })
}

/// Join an image directory and an entry name.
pub fn join_image_path(dir: &OsStr, name: &OsStr) -> OsString {
    let mut path = dir.as_bytes().to_vec();
    if !path.ends_with(b"/") {
        path.push(b'/');
    }
    path.extend_from_slice(name.as_bytes());
    OsString::from_vec(path)
}

/// Parse `ls -p <dir>` output.
///
/// The `.` entry of `/` is returned as the root directory itself; every other
/// `.` and `..` entry is skipped.
pub fn parse_ls_p(output: &[u8], dir: &OsStr) -> Vec<InodeEntry> {
    let mut entries = Vec::new();

    for line in output.split(|&b| b == b'\n') {
        let line = trim(line);
        let Some(body) = line.strip_prefix(b"/") else {
            continue;
        };

        let fields: Vec<&[u8]> = body.splitn(5, |&b| b == b'/').collect();
        if fields.len() != 5 {
            continue;
        }
        let (Some(inode), Some(mode), Some(uid), Some(gid)) = (
            number(fields[0], 10),
            number(fields[1], 8),
            number(fields[2], 10),
            number(fields[3], 10),
        ) else {
            continue;
        };

        // Remainder is "<name>/<size>/"; names cannot contain '/'
        let Some(split) = fields[4].iter().position(|&b| b == b'/') else {
            continue;
        };
        let (name, rest) = (&fields[4][..split], &fields[4][split + 1..]);
        let size = std::str::from_utf8(rest)
            .ok()
            .and_then(|s| s.trim_end_matches('/').parse::<u64>().ok());

        let path = match name {
            b"." if dir == "/" => OsString::from("/"),
            b"." | b".." => continue,
            _ => join_image_path(dir, OsStr::from_bytes(name)),
        };

        entries.push(InodeEntry {
            inode,
            mode,
            uid,
            gid,
            path,
            size,
        });
    }

    entries
}

fn trim(mut line: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = line {
        if !first.is_ascii_whitespace() {
            break;
        }
        line = rest;
    }
    while let [rest @ .., last] = line {
        if !last.is_ascii_whitespace() {
            break;
        }
        line = rest;
    }
    line
}

fn number(field: &[u8], radix: u32) -> Option<u32> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| u32::from_str_radix(s, radix).ok())
}

/// Quote a path for a debugfs command line.
pub fn quote(path: &OsStr) -> Result<OsString> {
    let bytes = path.as_bytes();
    if bytes.contains(&b'"') || bytes.contains(&b'\n') {
        bail!("Path {:?} cannot be passed to debugfs", path);
    }
    let mut quoted = Vec::with_capacity(bytes.len() + 2);
    quoted.push(b'"');
    quoted.extend_from_slice(bytes);
    quoted.push(b'"');
    Ok(OsString::from_vec(quoted))
}

/// A debugfs request: a command followed by quoted path arguments.
pub fn request(command: &str, paths: &[&OsStr]) -> Result<OsString> {
    let mut line = OsString::from(command);
    for path in paths {
        line.push(" ");
        line.push(quote(path)?);
    }
    Ok(line)
}

/// Render `sif` edits as a debugfs command script (`debugfs -w -f`).
pub fn sif_script(edits: &[InodeEdit]) -> Result<Vec<u8>> {
    let mut script = Vec::new();
    for edit in edits {
        let (field, value) = match edit.field {
            InodeField::Mode(mode) => ("mode", format!("0{:o}", mode)),
            InodeField::Uid(uid) => ("uid", uid.to_string()),
            InodeField::Gid(gid) => ("gid", gid.to_string()),
        };
        script.extend_from_slice(b"sif ");
        script.extend_from_slice(quote(&edit.path)?.as_bytes());
        script.extend_from_slice(format!(" {} {}\n", field, value).as_bytes());
    }
    Ok(script)
}

/// Error lines from debugfs stderr.
///
/// debugfs exits 0 even when individual commands fail, and always prints its
/// version banner to stderr, so anything else on stderr is a failure.
pub fn error_lines(stderr: &str) -> Vec<&str> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("debugfs "))
        .collect()
}

/// Metadata `rdump` fails to restore when not run as root.
const RDUMP_METADATA_WARNINGS: &[&str] = &[
    "while changing ownership of",
    "while setting permissions of",
    "while setting times of",
];

/// Error lines from `rdump` stderr, minus ownership/permission/time warnings.
///
/// An unprivileged rdump cannot chown the dumped files to the image's owner
/// and says so for every entry; the dumped tree is chmodded afterwards anyway.
pub fn rdump_error_lines(stderr: &str) -> Vec<&str> {
    error_lines(stderr)
        .into_iter()
        .filter(|line| {
            !RDUMP_METADATA_WARNINGS
                .iter()
                .any(|warning| line.contains(warning))
        })
        .collect()
}
