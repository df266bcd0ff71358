//! Configuration for the release source and update policy.
//!
//! The environment is read exactly once, by [`UpdaterConfig::from_env`], at
//! process start. Everything downstream receives the resulting value.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::version::Version;

/// Environment variable naming an alternate `owner/repo` release registry.
pub const REPO_ENV: &str = "GRAPPLING_OVERLAY_REPO";

/// Fallback repository variable (set by CI runners).
pub const GITHUB_REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";

/// Environment variable selecting the update channel.
pub const CHANNEL_ENV: &str = "GRAPPLING_OVERLAY_CHANNEL";

/// Environment variable overriding the GitHub API base URL.
pub const API_URL_ENV: &str = "GRAPPLING_OVERLAY_API_URL";

/// Environment variable overriding the release asset name.
pub const ASSET_ENV: &str = "GRAPPLING_OVERLAY_ASSET";

/// The project's own public releases.
pub const DEFAULT_REPO: &str = "GrapplingOverlay/OverlayApp";

/// GitHub API base URL.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Update channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateChannel {
    /// Only receive stable releases.
    #[default]
    Stable,
    /// Receive beta and stable releases.
    Beta,
}

impl UpdateChannel {
    /// Check if a version should be offered on this channel.
    ///
    /// Opaque identifiers (no parsed version) are offered on every channel.
    #[must_use]
    pub fn includes(&self, version: Option<&Version>) -> bool {
        match (self, version) {
            (Self::Stable, Some(v)) => v.is_stable(),
            _ => true,
        }
    }

    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Stable => "Stable",
            Self::Beta => "Beta",
        }
    }
}

impl fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for UpdateChannel {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            other => Err(UpdateError::Config(format!(
                "unknown update channel '{other}' (expected 'stable' or 'beta')"
            ))),
        }
    }
}

/// A GitHub `owner/repo` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    owner: String,
    repo: String,
}

impl RepoSlug {
    /// Repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl FromStr for RepoSlug {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        let valid_part = |p: &str| {
            !p.is_empty()
                && p
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        match s.trim().split_once('/') {
            Some((owner, repo)) if valid_part(owner) && valid_part(repo) => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(UpdateError::Config(format!(
                "invalid repository '{s}' (expected owner/repo)"
            ))),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Settings for the release source and the update orchestrator.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Release registry repository.
    pub repo: RepoSlug,
    /// GitHub API base URL (no trailing slash).
    pub api_base_url: String,
    /// Which release channel to follow.
    pub channel: UpdateChannel,
    /// Exact name of the release archive asset.
    pub asset_name: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for release metadata requests.
    pub request_timeout: Duration,
    /// Timeout for a whole archive download.
    pub download_timeout: Duration,
    /// Installed versions kept besides the current and known-good ones.
    pub retain_versions: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            repo: RepoSlug {
                owner: "GrapplingOverlay".to_string(),
                repo: "OverlayApp".to_string(),
            },
            api_base_url: DEFAULT_API_URL.to_string(),
            channel: UpdateChannel::Stable,
            asset_name: default_asset_name().to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            retain_versions: 1,
        }
    }
}

impl UpdaterConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(repo) = non_empty(REPO_ENV).or_else(|| non_empty(GITHUB_REPOSITORY_ENV)) {
            config.repo = repo.parse()?;
        }
        if let Some(channel) = non_empty(CHANNEL_ENV) {
            config.channel = channel.parse()?;
        }
        if let Some(url) = non_empty(API_URL_ENV) {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(asset) = non_empty(ASSET_ENV) {
            config.asset_name = asset.trim().to_string();
        }

        Ok(config)
    }

    /// Sets the repository.
    #[must_use]
    pub fn with_repo(mut self, repo: RepoSlug) -> Self {
        self.repo = repo;
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Default release asset for the running platform.
#[must_use]
pub const fn default_asset_name() -> &'static str {
    if cfg!(windows) {
        "GrapplingOverlay-Windows.zip"
    } else if cfg!(target_os = "macos") {
        "GrapplingOverlay-macOS.zip"
    } else {
        "GrapplingOverlay-Linux.tar.gz"
    }
}

/// Lowercase platform tag used to match release assets by name.
#[must_use]
pub const fn platform_tag() -> &'static str {
    if cfg!(windows) {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else {
        "linux"
    }
}
