//! Preflight checks for uceforge.
//!
//! Validates host tools and the environment before building or editing.
//! Run with `uceforge preflight` to check everything is ready.

mod environment;
mod host_tools;
pub mod types;

use anyhow::{bail, Result};
use log::info;

use crate::config::Config;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    info!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(&config.tools));

    info!("Checking environment...");
    checks.extend(environment::check_environment(config));

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
