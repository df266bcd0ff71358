//! Installation self-test.

use std::fs;
use std::path::Path;

use crate::config::LauncherConfig;

const PROBE_FILE: &str = ".selftest-probe";

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Short name of the check.
    pub name: &'static str,
    /// Whether it passed.
    pub passed: bool,
    /// What was found.
    pub detail: String,
}

/// All checks of one self-test run.
#[derive(Debug, Clone, Default)]
pub struct SelfTestReport {
    /// Checks in the order they ran.
    pub checks: Vec<Check>,
}

impl SelfTestReport {
    /// Whether every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// `0` when every check passed, `1` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.passed())
    }

    fn push(&mut self, name: &'static str, passed: bool, detail: String) {
        if passed {
            tracing::debug!("self-test {}: {}", name, detail);
        } else {
            tracing::error!("self-test {} failed: {}", name, detail);
        }
        self.checks.push(Check {
            name,
            passed,
            detail,
        });
    }
}

/// Verifies the bundle next to the launcher and that the data root is
/// writable.
#[must_use]
pub fn run(config: &LauncherConfig) -> SelfTestReport {
    let mut report = SelfTestReport::default();

    match config.bundle_dir.as_deref() {
        Some(dir) if dir.is_dir() => {
            report.push("bundle", true, dir.display().to_string());
            let executable = find_executable(dir, &config.executable_name);
            match executable {
                Some(path) => report.push("executable", true, path),
                None => report.push(
                    "executable",
                    false,
                    format!("{} not found under {}", config.executable_name, dir.display()),
                ),
            }
        }
        Some(dir) => {
            report.push("bundle", false, format!("{} does not exist", dir.display()));
            report.push("executable", false, "no bundle to search".to_string());
        }
        None => {
            report.push("bundle", false, "launcher location unknown".to_string());
            report.push("executable", false, "no bundle to search".to_string());
        }
    }

    let root = config.data_root.path();
    match probe_writable(root) {
        Ok(()) => report.push("data root", true, root.display().to_string()),
        Err(e) => report.push("data root", false, format!("{}: {e}", root.display())),
    }

    report
}

fn find_executable(bundle: &Path, name: &str) -> Option<String> {
    ["", "app", "GrapplingOverlay"]
        .iter()
        .map(|sub| bundle.join(sub).join(name))
        .find(|p| p.is_file())
        .map(|p| p.display().to_string())
}

fn probe_writable(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root)?;
    let probe = root.join(PROBE_FILE);
    fs::write(&probe, b"ok")?;
    fs::remove_file(&probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_updater::DataRoot;

    #[test]
    fn test_complete_installation_passes() {
        let temp = tempfile::tempdir().unwrap();
        let bundle = temp.path().join("app");
        fs::create_dir_all(&bundle).unwrap();
        let config = LauncherConfig::for_root(DataRoot::new(temp.path().join("data")), Some(bundle.clone()))
            .unwrap();
        fs::write(bundle.join(&config.executable_name), b"exe").unwrap();

        let report = run(&config);
        assert!(report.passed(), "{report:?}");
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.checks.len(), 3);
        assert!(!temp.path().join("data").join(PROBE_FILE).exists());
    }

    #[test]
    fn test_missing_executable_fails() {
        let temp = tempfile::tempdir().unwrap();
        let bundle = temp.path().join("app");
        fs::create_dir_all(&bundle).unwrap();
        let config =
            LauncherConfig::for_root(DataRoot::new(temp.path().join("data")), Some(bundle)).unwrap();

        let report = run(&config);
        assert_eq!(report.exit_code(), 1);
        let failed: Vec<_> = report.checks.iter().filter(|c| !c.passed).map(|c| c.name).collect();
        assert_eq!(failed, vec!["executable"]);
    }
}
