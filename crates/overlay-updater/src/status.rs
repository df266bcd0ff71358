//! Record of the last update attempt, surfaced by `status`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::VersionId;

/// File name inside `app/`.
pub const STATUS_FILE: &str = "update_status.json";

/// Outcome of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    /// Whether the update was successful.
    pub success: bool,
    /// Version that was installed (or attempted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionId>,
    /// Version current before the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<VersionId>,
    /// Timestamp of the attempt.
    pub timestamp: DateTime<Utc>,
    /// Error message if failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Path to log file for debugging.
    pub log_file: PathBuf,
}

impl UpdateStatus {
    /// Creates a new successful status.
    #[must_use]
    pub fn success(version: VersionId, previous_version: Option<VersionId>, log_file: PathBuf) -> Self {
        Self {
            success: true,
            version: Some(version),
            previous_version,
            timestamp: Utc::now(),
            error: None,
            log_file,
        }
    }

    /// Creates a new failed status.
    #[must_use]
    pub fn failure(
        version: Option<VersionId>,
        previous_version: Option<VersionId>,
        error: String,
        log_file: PathBuf,
    ) -> Self {
        Self {
            success: false,
            version,
            previous_version,
            timestamp: Utc::now(),
            error: Some(error),
            log_file,
        }
    }

    /// Writes the status to `app_dir/update_status.json`.
    pub fn write(&self, app_dir: &Path) -> Result<()> {
        fs::create_dir_all(app_dir)?;
        let path = app_dir.join(STATUS_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        tracing::debug!("Status written to {}", path.display());
        Ok(())
    }

    /// Reads the last status, if one was written.
    pub fn read(app_dir: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(app_dir.join(STATUS_FILE)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
