//! Update request file.
//!
//! The running application asks for an update either by exiting with the
//! update exit code or by writing `app/update.request`. The file outlives a
//! crash of the application, so a request is never lost. Any file at that
//! path counts as a request; the JSON body is informational.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use overlay_updater::{Result, VersionId};

/// Request file name inside `app/`.
pub const REQUEST_FILE: &str = "update.request";

/// Contents of the update request file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
    /// Version that was running when the request was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<VersionId>,
}

impl UpdateRequest {
    /// A request made now.
    #[must_use]
    pub fn new(from_version: Option<VersionId>) -> Self {
        Self {
            requested_at: Utc::now(),
            from_version,
        }
    }

    /// `app/update.request`
    #[must_use]
    pub fn path(app_dir: &Path) -> PathBuf {
        app_dir.join(REQUEST_FILE)
    }

    /// Whether a request is waiting.
    #[must_use]
    pub fn is_pending(app_dir: &Path) -> bool {
        Self::path(app_dir).is_file()
    }

    /// Writes the request file.
    pub fn write(&self, app_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(Self::path(app_dir), content)?;
        Ok(())
    }

    /// Consumes a pending request, removing the file.
    ///
    /// A file that is empty or not valid JSON still counts as a request.
    pub fn take(app_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(app_dir);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let request = serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::debug!("Update request body not understood ({}), treating as bare", e);
            Self::new(None)
        });
        Self::clear(app_dir)?;
        Ok(Some(request))
    }

    /// Removes the request file if present.
    pub fn clear(app_dir: &Path) -> Result<()> {
        match fs::remove_file(Self::path(app_dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
