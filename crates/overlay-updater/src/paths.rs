//! Persistent per-user data root.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   logs/            launcher.log, app.log
//!   outputs/         pose_tracks.json (owned by the application)
//!   profiles/
//!   models/
//!   datasets/
//!   app/
//!     versions/<id>/ one extracted bundle per version
//!     current        pointer file naming the active version
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Application directory name.
pub const APP_NAME: &str = "GrapplingOverlay";

/// Environment variable overriding the data root location.
pub const HOME_ENV: &str = "GRAPPLING_OVERLAY_HOME";

/// Launcher log file name inside `logs/`.
pub const LAUNCHER_LOG_NAME: &str = "launcher.log";

/// Handle to the persistent data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    /// Uses an explicit directory as the data root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the platform default location.
    ///
    /// Windows: `%LOCALAPPDATA%\GrapplingOverlay`. Elsewhere:
    /// `~/.grappling_overlay`. `override_dir` (from [`HOME_ENV`]) wins.
    #[must_use]
    pub fn resolve(override_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = override_dir.filter(|d| !d.as_os_str().is_empty()) {
            return Self::new(dir);
        }

        let root = if cfg!(windows) {
            dirs::data_local_dir().map(|d| d.join(APP_NAME))
        } else {
            dirs::home_dir().map(|d| d.join(".grappling_overlay"))
        };

        Self::new(root.unwrap_or_else(|| PathBuf::from(".grappling_overlay")))
    }

    /// The root directory itself.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// `logs/`
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `logs/launcher.log`
    #[must_use]
    pub fn launcher_log(&self) -> PathBuf {
        self.logs_dir().join(LAUNCHER_LOG_NAME)
    }

    /// `outputs/`
    #[must_use]
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// `profiles/`
    #[must_use]
    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    /// `models/`
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// `datasets/`
    #[must_use]
    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }

    /// `app/`, owned by the version store.
    #[must_use]
    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    /// Creates every directory of the layout that does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.logs_dir(),
            self.outputs_dir(),
            self.profiles_dir(),
            self.models_dir(),
            self.datasets_dir(),
            self.app_dir().join("versions"),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
