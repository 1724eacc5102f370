//! Inspect command - verifies a container's layout and digests.

use anyhow::{bail, Result};
use std::path::Path;

use uceforge::container;

/// Execute the inspect command.
pub fn cmd_inspect(path: &Path, json: bool) -> Result<()> {
    let report = container::inspect(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let layout = &report.layout;
        let mark = |ok: bool| if ok { "OK" } else { "MISMATCH" };

        println!("{}", report.path.display());
        println!("  size:         {} bytes", layout.total_len);
        println!("  fs region:    0..{}", layout.fs_region_len);
        println!(
            "  fs md5:       {} [{}]",
            report.fs_digest_stored,
            mark(report.fs_digest_ok)
        );
        println!(
            "  reserved:     {}",
            if report.reserved_zero { "zero" } else { "NON-ZERO" }
        );
        println!(
            "  save md5:     {} [{}]",
            report.save_digest_stored,
            if report.save_digest_ok { "OK" } else { "stale" }
        );
        println!("  save region:  {}..{}", layout.save_offset, layout.total_len);
        if !report.save_digest_ok {
            println!("  (the save partition was edited after build; this is expected)");
        }
    }

    if !report.is_valid() {
        bail!("{} is damaged: filesystem region or header does not verify", path.display());
    }
    Ok(())
}
