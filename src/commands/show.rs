//! Show command - displays information.

use anyhow::Result;

use uceforge::config::Config;
use uceforge::layout;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the fixed container layout constants
    Layout,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Layout => {
            println!("Container layout:");
            println!("  fs region alignment: {}", layout::FS_ALIGNMENT);
            println!("  squashfs block size: {}", layout::SQUASHFS_BLOCK_SIZE);
            println!(
                "  header:              {} bytes (fs md5 {}, reserved {}, save md5 {})",
                layout::HEADER_LEN,
                layout::DIGEST_LEN,
                layout::RESERVED_LEN,
                layout::DIGEST_LEN
            );
            println!("  save partition:      {} bytes (ext4)", layout::SAVE_SIZE);
        }
    }
    Ok(())
}
