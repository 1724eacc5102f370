//! Shared test utilities for uceforge tests.
#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use uceforge::backend::{
    FilesystemImageBackend, ImageFormatError, InodeEdit, InodeEntry, InodeField,
};
use uceforge::config::{Config, Owner};
use uceforge::framer::{hex, md5_file};
use uceforge::layout::SAVE_SIZE;

/// Test environment with a staged directory and an output directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Staged game directory (build input)
    pub staged: PathBuf,
    /// Where containers are written
    pub out_dir: PathBuf,
    pub config: Config,
}

impl TestEnv {
    /// Create a new test environment with a mock staged directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let staged = temp_dir.path().join("staged");
        let out_dir = temp_dir.path().join("out");
        create_mock_staged_dir(&staged);
        fs::create_dir_all(&out_dir).expect("Failed to create out dir");

        let mut config = Config::from_vars(Vec::new());
        config.blank_save_image = None;

        Self {
            _temp_dir: temp_dir,
            staged,
            out_dir,
            config,
        }
    }

    pub fn output(&self) -> PathBuf {
        self.out_dir.join("game.uce")
    }

    /// Path for an extra scratch file.
    pub fn path(&self, name: &str) -> PathBuf {
        self._temp_dir.path().join(name)
    }
}

/// Create a staged directory shaped like a real game.
pub fn create_mock_staged_dir(root: &Path) {
    for dir in ["boxart", "emu", "roms", "save"] {
        fs::create_dir_all(root.join(dir)).expect("Failed to create staged dir");
    }
    fs::write(
        root.join("exec.sh"),
        "#!/bin/sh\nset -e\n/usr/bin/retroarch -L emu/core.so roms/game.nes\n",
    )
    .expect("Failed to create launcher");
    fs::set_permissions(root.join("exec.sh"), fs::Permissions::from_mode(0o644))
        .expect("Failed to set permissions");
    fs::write(root.join("boxart/boxart.png"), b"\x89PNG fake").expect("Failed to create boxart");
    fs::write(root.join("emu/core.so"), vec![0x7fu8; 3000]).expect("Failed to create core");
    fs::write(root.join("roms/game.nes"), vec![0x4eu8; 2000]).expect("Failed to create rom");
}

/// Build a zip file with the given members.
pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("Failed to create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, data) in members {
        writer.start_file(*name, options).expect("Failed to start zip member");
        writer.write_all(data).expect("Failed to write zip member");
    }
    writer.finish().expect("Failed to finish zip");
}

/// One formatted image as the fake backend sees it.
#[derive(Debug, Clone, Default)]
pub struct FakeImage {
    pub entries: Vec<InodeEntry>,
    pub contents: HashMap<OsString, Vec<u8>>,
}

impl FakeImage {
    pub fn entry(&self, path: &str) -> Option<&InodeEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.path.to_string_lossy().into_owned())
            .collect();
        paths.sort();
        paths
    }
}

/// In-memory stand-in for squashfs-tools and e2fsprogs.
///
/// Images are identified by the md5 of their bytes, so copies of an image
/// (as made when splicing containers) resolve to the same filesystem.
/// Like mke2fs run as root, formatting leaves every inode owned by 0:0.
#[derive(Default)]
pub struct FakeBackend {
    images: RefCell<HashMap<String, FakeImage>>,
    /// Relative paths of every squashfs input tree, sorted
    pub squashfs_inputs: RefCell<Vec<Vec<String>>>,
    pub squashfs_owner: RefCell<Option<Owner>>,
    pub edit_batches: RefCell<usize>,
    pub fail_squashfs: bool,
    /// Inode edits fail like a missing or broken debugfs
    pub fail_inode_edits: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_squashfs() -> Self {
        Self {
            fail_squashfs: true,
            ..Self::default()
        }
    }

    pub fn failing_inode_edits() -> Self {
        Self {
            fail_inode_edits: true,
            ..Self::default()
        }
    }

    /// The filesystem stored in `image`, if it is one this backend formatted.
    pub fn image(&self, image: &Path) -> Option<FakeImage> {
        let key = md5_file(image).ok().map(|d| hex(&d))?;
        self.images.borrow().get(&key).cloned()
    }

    /// Filesystem stored in a raw save region.
    pub fn image_bytes(&self, data: &[u8]) -> Option<FakeImage> {
        let key = hex(&uceforge::framer::md5_bytes(data));
        self.images.borrow().get(&key).cloned()
    }

    fn key(image: &Path) -> Result<String> {
        Ok(hex(&md5_file(image)?))
    }
}

fn relative_paths(source: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| {
            e.path()
                .strip_prefix(source)
                .unwrap_or(e.path())
                .to_path_buf()
        })
        .collect();
    paths.sort();
    paths
}

/// Absolute image path of a host path relative to the tree root.
fn image_path(rel: &Path) -> OsString {
    let mut path = OsString::from("/");
    path.push(rel.as_os_str());
    path
}

impl FilesystemImageBackend for FakeBackend {
    fn build_squashfs(&self, source: &Path, output: &Path, owner: Owner) -> Result<()> {
        if self.fail_squashfs {
            bail!("'mksquashfs' failed (exit code 1):\nFATAL ERROR: fake failure");
        }
        let paths = relative_paths(source);
        let mut blob = b"hsqs".to_vec();
        for path in &paths {
            blob.extend_from_slice(path.as_os_str().as_bytes());
            let full = source.join(path);
            if full.is_file() && !full.is_symlink() {
                blob.extend_from_slice(&fs::read(&full)?);
            }
        }
        fs::write(output, &blob)?;
        self.squashfs_inputs.borrow_mut().push(
            paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        );
        *self.squashfs_owner.borrow_mut() = Some(owner);
        Ok(())
    }

    fn create_blank(&self, path: &Path, size: u64) -> Result<()> {
        let file = fs::File::create(path)?;
        file.set_len(size)?;
        Ok(())
    }

    fn format_ext4(&self, source: &Path, image: &Path) -> Result<()> {
        let mut fake = FakeImage::default();
        let root_meta = fs::metadata(source)?;
        fake.entries.push(InodeEntry {
            inode: 2,
            mode: root_meta.mode(),
            uid: 0,
            gid: 0,
            path: "/".into(),
            size: None,
        });

        let mut inode = 11;
        let mut signature = Vec::new();
        for rel in relative_paths(source) {
            let full = source.join(&rel);
            let meta = fs::symlink_metadata(&full)?;
            let path = image_path(&rel);
            inode += 1;
            let is_dir = meta.is_dir();
            fake.entries.push(InodeEntry {
                inode,
                mode: meta.mode(),
                uid: 0,
                gid: 0,
                path: path.clone(),
                size: if is_dir { None } else { Some(meta.len()) },
            });
            signature.extend_from_slice(path.as_os_str().as_bytes());
            if meta.is_file() {
                let data = fs::read(&full)?;
                signature.extend_from_slice(&data);
                fake.contents.insert(path, data);
            }
        }

        let len = fs::metadata(image)?.len();
        if len != SAVE_SIZE {
            bail!("fake mke2fs: {} is not a save partition", image.display());
        }
        // Make the image bytes unique to the tree without changing its size
        let mut file = fs::OpenOptions::new().write(true).open(image)?;
        file.seek(SeekFrom::Start(1024))?;
        file.write_all(&uceforge::framer::md5_bytes(&signature))?;
        file.write_all(b"fake-ext4")?;
        drop(file);

        self.images.borrow_mut().insert(Self::key(image)?, fake);
        Ok(())
    }

    fn list_dir(&self, image: &Path, dir: &OsStr) -> Result<Vec<InodeEntry>> {
        let key = Self::key(image)?;
        let images = self.images.borrow();
        let Some(fake) = images.get(&key) else {
            return Err(ImageFormatError {
                image: image.to_path_buf(),
                detail: "Bad magic number in super-block while opening filesystem".into(),
            }
            .into());
        };

        let mut prefix = dir.as_bytes().to_vec();
        if !prefix.ends_with(b"/") {
            prefix.push(b'/');
        }
        let mut entries: Vec<InodeEntry> = fake
            .entries
            .iter()
            .filter(|e| {
                if e.path == "/" {
                    return dir == "/";
                }
                e.path
                    .as_bytes()
                    .strip_prefix(prefix.as_slice())
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains(&b'/'))
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn set_inode_fields(&self, image: &Path, edits: &[InodeEdit]) -> Result<()> {
        if self.fail_inode_edits {
            bail!("Failed to execute 'debugfs'. Is it installed?");
        }
        let key = Self::key(image)?;
        let mut images = self.images.borrow_mut();
        let fake = images.get_mut(&key).context("fake debugfs: unknown image")?;
        for edit in edits {
            let entry = fake
                .entries
                .iter_mut()
                .find(|e| e.path == edit.path)
                .with_context(|| format!("fake debugfs: {:?} not found", edit.path))?;
            match edit.field {
                InodeField::Mode(mode) => entry.mode = mode,
                InodeField::Uid(uid) => entry.uid = uid,
                InodeField::Gid(gid) => entry.gid = gid,
            }
        }
        *self.edit_batches.borrow_mut() += 1;
        Ok(())
    }

    fn dump_tree(&self, image: &Path, destination: &Path) -> Result<()> {
        let fake = self.image(image).context("fake debugfs: unknown image")?;
        for entry in &fake.entries {
            if entry.path == "/" {
                continue;
            }
            let path = Path::new(&entry.path);
            let target = destination.join(path.strip_prefix("/").unwrap_or(path));
            if entry.is_dir() {
                fs::create_dir_all(&target)?;
            } else if let Some(data) = fake.contents.get(&entry.path) {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, data)?;
            }
        }
        Ok(())
    }
}

/// Format a standalone save image with the fake backend.
pub fn fake_save_image(backend: &FakeBackend, tree: &Path, image: &Path) {
    backend.create_blank(image, SAVE_SIZE).unwrap();
    backend.format_ext4(tree, image).unwrap();
}

/// Assert every inode is owned by `owner` with rwx for everyone.
pub fn assert_normalized(image: &FakeImage, owner: Owner) {
    for entry in &image.entries {
        assert_eq!(entry.uid, owner.uid, "uid of {:?}", entry.path);
        assert_eq!(entry.gid, owner.gid, "gid of {:?}", entry.path);
        assert_eq!(entry.mode & 0o7777, 0o777, "mode of {:?}", entry.path);
    }
}
