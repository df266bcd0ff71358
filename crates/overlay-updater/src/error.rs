//! Error types for the launcher and update system.

use thiserror::Error;

use crate::version::VersionId;

/// Errors that can occur while managing installed versions or updating.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// Failed to parse a version string or identifier.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Registry unreachable, request timed out or download interrupted.
    #[error("network error: {0}")]
    Network(String),

    /// GitHub API rate limit exceeded.
    #[error("GitHub API rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited {
        /// Seconds until rate limit resets.
        retry_after: u64,
    },

    /// No releases (or no matching asset) are available.
    #[error("not found: {0}")]
    NotFound(String),

    /// Downloaded archive failed SHA256 verification.
    #[error("integrity check failed: expected {expected}, got {actual}")]
    Integrity {
        /// Expected SHA256 hash.
        expected: String,
        /// Actual SHA256 hash of downloaded data.
        actual: String,
    },

    /// Extraction or staging of a version failed.
    #[error("install error: {0}")]
    Install(String),

    /// Attempted to remove the version the current pointer references.
    #[error("version {0} is the current version and cannot be removed")]
    InUse(VersionId),

    /// The resolved application binary is missing or failed to start.
    #[error("startup error: {0}")]
    Startup(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Failed to parse a JSON document.
    #[error("JSON parse error: {0}")]
    Json(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled by the user.
    #[error("update cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Returns a user-friendly error message suitable for display.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Network(_) => {
                "Could not reach the release server. Please check your internet connection."
            }
            Self::RateLimited { .. } => "GitHub API rate limit reached. Please try again later.",
            Self::NotFound(_) => "No update is available for this installation.",
            Self::Integrity { .. } => {
                "Security verification failed. The download may have been tampered with."
            }
            Self::Install(_) => "Could not install the update. Your current version is unchanged.",
            Self::InUse(_) => "The active version cannot be removed.",
            Self::Startup(_) => "The application could not be started.",
            Self::Cancelled => "The update was cancelled.",
            Self::Config(_) => "The updater is not configured correctly.",
            Self::InvalidVersion(_) | Self::Io(_) | Self::Json(_) => {
                "An unexpected error occurred."
            }
        }
    }

    /// Returns whether this error is potentially recoverable with a retry.
    ///
    /// Retries are always manual; this only drives the wording shown to the user.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Io(_)
        )
    }

    /// Returns true for errors caused by the network or the release server.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("request timed out: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Install(format!("ZIP extraction failed: {err}"))
    }
}

/// Result type alias for launcher and update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = UpdateError::Network("connection refused".to_string());
        assert!(err.user_message().contains("internet connection"));

        let err = UpdateError::Integrity {
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        assert!(err.user_message().contains("Security verification failed"));

        let err = UpdateError::Install("disk full".to_string());
        assert!(err.user_message().contains("unchanged"));
    }

    #[test]
    fn test_retryable() {
        assert!(UpdateError::Network("timeout".to_string()).is_retryable());
        assert!(UpdateError::RateLimited { retry_after: 60 }.is_retryable());
        assert!(
            !UpdateError::Integrity {
                expected: "a".to_string(),
                actual: "b".to_string()
            }
            .is_retryable()
        );
        assert!(!UpdateError::Cancelled.is_retryable());
    }

    #[test]
    fn test_in_use_display_names_version() {
        let id = VersionId::new("1.2.0").unwrap();
        let err = UpdateError::InUse(id);
        assert_eq!(
            err.to_string(),
            "version 1.2.0 is the current version and cannot be removed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: UpdateError = io.into();
        assert!(matches!(err, UpdateError::Io(msg) if msg.contains("gone")));
    }
}
