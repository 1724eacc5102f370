//! Build command - packs a staged directory into a container.

use anyhow::Result;
use std::path::Path;

use uceforge::assemble;
use uceforge::backend::ToolBackend;
use uceforge::config::Config;
use uceforge::framer::hex;
use uceforge::preflight;

/// Execute the build command.
pub fn cmd_build(
    staged_dir: &Path,
    output: &Path,
    config: &Config,
    check: bool,
    json: bool,
) -> Result<()> {
    if check {
        preflight::run_preflight_or_fail(config)?;
    }

    let backend = ToolBackend::new(config.tools.clone());
    let report = assemble::build(&backend, config, staged_dir, output)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Built {}", report.output.display());
        println!(
            "  squashfs:    {} bytes (padded to {})",
            report.fs_len, report.fs_region_len
        );
        println!("  fs md5:      {}", hex(&report.fs_digest));
        println!("  save source: {}", report.save_kind);
        for skipped in &report.skipped_save_sources {
            println!("  skipped:     {} ({})", skipped.path.display(), skipped.reason);
        }
        println!("  save md5:    {}", hex(&report.save_digest));
        println!("  total:       {} bytes", report.total_len);
    }
    Ok(())
}
