//! Configuration management for uceforge.
//!
//! Reads configuration from environment variables. `main` loads an optional
//! `.env` file first via dotenvy, so values there act as defaults and real
//! environment variables take precedence.

use log::warn;
use std::collections::HashMap;
use std::path::PathBuf;

/// Default owner of every squashfs entry (same as mksquashfs -root-owned).
pub const DEFAULT_FS_ID: u32 = 0;

/// Default uid/gid the console runs save I/O as.
pub const DEFAULT_SAVE_ID: u32 = 1002;

/// File managers tried, in order, when none is configured.
pub const KNOWN_FILE_MANAGERS: &[&str] = &[
    "thunar",
    "dolphin",
    "pcmanfm",
    "nautilus",
    "nemo",
    "konqueror",
];

/// External tool names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub mksquashfs: String,
    pub mke2fs: String,
    pub debugfs: String,
    pub truncate: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            mksquashfs: "mksquashfs".to_string(),
            mke2fs: "mke2fs".to_string(),
            debugfs: "debugfs".to_string(),
            truncate: "truncate".to_string(),
        }
    }
}

/// Numeric owner applied to image entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// uceforge configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// External tool names or paths
    pub tools: Tools,
    /// Owner forced onto squashfs entries
    pub fs_owner: Owner,
    /// Owner of every inode in the save partition
    pub save_owner: Owner,
    /// Pre-built blank save partition (generated when absent)
    pub blank_save_image: Option<PathBuf>,
    /// File manager for interactive save editing
    pub file_manager: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: Tools::default(),
            fs_owner: Owner {
                uid: DEFAULT_FS_ID,
                gid: DEFAULT_FS_ID,
            },
            save_owner: Owner {
                uid: DEFAULT_SAVE_ID,
                gid: DEFAULT_SAVE_ID,
            },
            blank_save_image: default_blank_save_image(),
            file_manager: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from explicit key/value pairs.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env_vars: HashMap<String, String> = vars.into_iter().collect();
        let defaults = Self::default();

        let tool = |key: &str, default: String| {
            env_vars
                .get(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
        };

        let id = |key: &str, default: u32| match env_vars.get(key) {
            Some(value) => value.trim().parse::<u32>().unwrap_or_else(|_| {
                warn!("{}={} is not a valid numeric id, using {}", key, value, default);
                default
            }),
            None => default,
        };

        let tools = Tools {
            mksquashfs: tool("UCE_MKSQUASHFS", defaults.tools.mksquashfs),
            mke2fs: tool("UCE_MKE2FS", defaults.tools.mke2fs),
            debugfs: tool("UCE_DEBUGFS", defaults.tools.debugfs),
            truncate: tool("UCE_TRUNCATE", defaults.tools.truncate),
        };

        let blank_save_image = env_vars
            .get("UCE_BLANK_SAVE_IMAGE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .or(defaults.blank_save_image);

        let file_manager = env_vars
            .get("UCE_FILE_MANAGER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            tools,
            fs_owner: Owner {
                uid: id("UCE_FS_UID", defaults.fs_owner.uid),
                gid: id("UCE_FS_GID", defaults.fs_owner.gid),
            },
            save_owner: Owner {
                uid: id("UCE_SAVE_UID", defaults.save_owner.uid),
                gid: id("UCE_SAVE_GID", defaults.save_owner.gid),
            },
            blank_save_image,
            file_manager,
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  UCE_MKSQUASHFS: {}", self.tools.mksquashfs);
        println!("  UCE_MKE2FS: {}", self.tools.mke2fs);
        println!("  UCE_DEBUGFS: {}", self.tools.debugfs);
        println!("  UCE_TRUNCATE: {}", self.tools.truncate);
        println!("  UCE_FS_UID/GID: {}:{}", self.fs_owner.uid, self.fs_owner.gid);
        println!("  UCE_SAVE_UID/GID: {}:{}", self.save_owner.uid, self.save_owner.gid);
        match &self.blank_save_image {
            Some(path) if path.is_file() => {
                println!("  UCE_BLANK_SAVE_IMAGE: {} (FOUND)", path.display())
            }
            Some(path) => println!(
                "  UCE_BLANK_SAVE_IMAGE: {} (NOT FOUND, will be generated)",
                path.display()
            ),
            None => println!("  UCE_BLANK_SAVE_IMAGE: (unset, will be generated)"),
        }
        println!(
            "  UCE_FILE_MANAGER: {}",
            self.file_manager.as_deref().unwrap_or("(auto-detect)")
        );
    }
}

/// `<data dir>/uceforge/blank_save.img`, if the platform has a data dir.
fn default_blank_save_image() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("uceforge").join("blank_save.img"))
}
