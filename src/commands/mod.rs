//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Pack a staged directory into a container
//! - `save` - Extract, replace or edit the save partition
//! - `inspect` - Verify a container
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
pub mod inspect;
mod preflight;
pub mod save;
pub mod show;

pub use build::cmd_build;
pub use inspect::cmd_inspect;
pub use preflight::cmd_preflight;
pub use save::{cmd_edit_save, cmd_extract_save, cmd_replace_save};
pub use show::cmd_show;
