//! Environment checks (stock image, scratch space, edit prerequisites).

use std::fs;
use std::path::Path;

use crate::config::{Config, KNOWN_FILE_MANAGERS};
use crate::edit::{mount, select_file_manager};
use crate::layout::SAVE_SIZE;

use super::types::CheckResult;

/// Check everything besides tools that builds and edits depend on.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    vec![
        check_blank_save_image(config.blank_save_image.as_deref()),
        check_temp_dir(&std::env::temp_dir()),
        check_mount_privilege(),
        check_file_manager(config.file_manager.as_deref()),
    ]
}

fn check_blank_save_image(path: Option<&Path>) -> CheckResult {
    const NAME: &str = "blank save image";
    let Some(path) = path else {
        return CheckResult::warn(NAME, "Not configured - a blank partition is generated per build");
    };
    match fs::metadata(path) {
        Ok(meta) if meta.len() == SAVE_SIZE => {
            CheckResult::pass_with(NAME, &path.display().to_string())
        }
        Ok(meta) => CheckResult::warn(
            NAME,
            &format!(
                "{} is {} bytes, expected {} - it will be ignored",
                path.display(),
                meta.len(),
                SAVE_SIZE
            ),
        ),
        Err(_) => CheckResult::warn(
            NAME,
            &format!(
                "{} not found - a blank partition is generated per build",
                path.display()
            ),
        ),
    }
}

fn check_temp_dir(dir: &Path) -> CheckResult {
    const NAME: &str = "temp dir writable";
    match tempfile::tempfile_in(dir) {
        Ok(_) => CheckResult::pass_with(NAME, &dir.display().to_string()),
        Err(e) => CheckResult::fail(NAME, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

fn check_mount_privilege() -> CheckResult {
    const NAME: &str = "mount strategy";
    match mount::check_supported() {
        Ok(()) => CheckResult::pass(NAME),
        Err(e) => CheckResult::skip(NAME, &e.to_string()),
    }
}

fn check_file_manager(configured: Option<&str>) -> CheckResult {
    const NAME: &str = "file manager";
    match select_file_manager(None, configured) {
        Ok(program) => CheckResult::pass_with(NAME, &program),
        Err(_) => CheckResult::warn(
            NAME,
            &format!(
                "None of {} found - only `edit-save --apply` will work",
                KNOWN_FILE_MANAGERS.join(", ")
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;
    use tempfile::TempDir;

    #[test]
    fn test_blank_image_wrong_size_warns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.img");
        fs::write(&path, b"short").unwrap();
        assert_eq!(check_blank_save_image(Some(&path)).status, CheckStatus::Warn);
    }

    #[test]
    fn test_blank_image_ok() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.img");
        fs::File::create(&path).unwrap().set_len(SAVE_SIZE).unwrap();
        assert_eq!(check_blank_save_image(Some(&path)).status, CheckStatus::Pass);
    }

    #[test]
    fn test_temp_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(check_temp_dir(dir.path()).status, CheckStatus::Pass);
        assert_eq!(
            check_temp_dir(&dir.path().join("missing")).status,
            CheckStatus::Fail
        );
    }
}
