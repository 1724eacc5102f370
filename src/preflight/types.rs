//! Preflight check types and report.

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - builds or edits will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
    /// Check skipped (not applicable).
    Skip,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }

    pub fn skip(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Skip, Some(details))
    }

    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status_str) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
                CheckStatus::Skip => ("○", "SKIP"),
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let total = self.checks.len();
        let passed = self.count(CheckStatus::Pass);
        let failed = self.fail_count();
        let warned = self.warn_count();

        println!("Summary: {}/{} passed", passed, total);
        if failed > 0 {
            println!("         {} FAILED - containers cannot be built", failed);
        }
        if warned > 0 {
            println!("         {} warnings", warned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass("mksquashfs"),
                CheckResult::warn("file manager", "none found"),
                CheckResult::fail("debugfs", "Not found"),
                CheckResult::skip("root", "not needed"),
            ],
        };
        assert!(!report.all_passed());
        assert_eq!(report.fail_count(), 1);
        assert_eq!(report.warn_count(), 1);
    }
}
