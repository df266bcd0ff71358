//! Launcher configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use overlay_updater::paths::HOME_ENV;
use overlay_updater::{DataRoot, Result, UpdaterConfig, VersionId, default_executable_name};

use crate::launch::UPDATE_EXIT_CODE;

/// Directory next to the launcher executable holding the bundled application.
pub const BUNDLE_DIR_NAME: &str = "app";

/// Identifier the bundled application is installed under.
pub const BUNDLED_VERSION: &str = "0";

/// Everything the launcher needs, resolved once at process start.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Persistent per-user data root.
    pub data_root: DataRoot,
    /// Application bundle shipped beside the launcher (`<launcher dir>/app`).
    pub bundle_dir: Option<PathBuf>,
    /// Path of the running launcher executable.
    pub launcher_exe: Option<PathBuf>,
    /// Name of the application executable inside a bundle.
    pub executable_name: String,
    /// Exit code with which the application requests an update.
    pub update_exit_code: i32,
    /// Identifier used for the bundled application.
    pub bundled_version: VersionId,
    /// How long the child must stay up to count as a good start.
    pub startup_grace: Duration,
    /// Release source and update policy.
    pub updater: UpdaterConfig,
}

impl LauncherConfig {
    /// Reads the process environment and the launcher location.
    pub fn from_env() -> Result<Self> {
        let launcher_exe = std::env::current_exe().ok();
        Self::from_lookup(|key| std::env::var(key).ok(), launcher_exe)
    }

    /// Builds the configuration from a variable lookup and the launcher path.
    pub fn from_lookup<F>(lookup: F, launcher_exe: Option<PathBuf>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_root = DataRoot::resolve(lookup(HOME_ENV).map(PathBuf::from));
        let bundle_dir = launcher_exe
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join(BUNDLE_DIR_NAME));

        let mut config = Self::for_root(data_root, bundle_dir)?;
        config.launcher_exe = launcher_exe;
        config.updater = UpdaterConfig::from_lookup(&lookup)?;
        Ok(config)
    }

    /// A configuration rooted at `data_root` with an explicit bundle.
    pub fn for_root(data_root: DataRoot, bundle_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            data_root,
            bundle_dir,
            launcher_exe: None,
            executable_name: default_executable_name().to_string(),
            update_exit_code: UPDATE_EXIT_CODE,
            bundled_version: VersionId::new(BUNDLED_VERSION)?,
            startup_grace: Duration::from_secs(2),
            updater: UpdaterConfig::default(),
        })
    }

    /// `logs/launcher.log` under the data root.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_root.launcher_log()
    }
}
