//! Host tool availability checks.

use crate::config::Tools;
use crate::process;

use super::types::CheckResult;

/// Check the configured image tools are installed.
pub fn check_host_tools(tools: &Tools) -> Vec<CheckResult> {
    let required_tools = [
        (
            tools.mksquashfs.as_str(),
            "squashfs-tools",
            "Required to create the read-only filesystem",
        ),
        (
            tools.mke2fs.as_str(),
            "e2fsprogs",
            "Required to format save partitions",
        ),
        (
            tools.debugfs.as_str(),
            "e2fsprogs",
            "Required to fix save ownership and for offline edits",
        ),
        (
            tools.truncate.as_str(),
            "coreutils",
            "Required to allocate save partitions",
        ),
    ];

    let mut results: Vec<CheckResult> = required_tools
        .into_iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, true))
        .collect();

    // Only the mount edit strategy needs these
    for tool in ["mount", "umount"] {
        results.push(check_tool_exists(
            tool,
            "util-linux",
            "Required for `edit-save --strategy mount`",
            false,
        ));
    }

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
