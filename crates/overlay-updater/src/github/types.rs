//! GitHub API types.

use serde::Deserialize;

/// Raw release data from the GitHub API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    /// The release tag name (e.g., "v1.3.0").
    pub tag_name: String,

    /// The release title/name.
    #[serde(default)]
    pub name: Option<String>,

    /// Release notes/body in markdown format.
    #[serde(default)]
    pub body: Option<String>,

    /// Whether this is a pre-release.
    #[serde(default)]
    pub prerelease: bool,

    /// Whether this is a draft release.
    #[serde(default)]
    pub draft: bool,

    /// Release assets (archives, manifests, checksums).
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,

    /// HTML URL to the release page.
    #[serde(default)]
    pub html_url: Option<String>,

    /// Publication timestamp.
    #[serde(default)]
    pub published_at: Option<String>,
}

impl GitHubRelease {
    /// Returns the changelog/release notes.
    #[must_use]
    pub fn changelog(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Finds the application archive.
    ///
    /// An exact `asset_name` match wins. Otherwise the first fully uploaded
    /// archive whose name contains `platform_tag` (case-insensitive) is used.
    #[must_use]
    pub fn find_archive(&self, asset_name: &str, platform_tag: &str) -> Option<&GitHubAsset> {
        if let Some(exact) = self
            .assets
            .iter()
            .find(|a| a.name == asset_name && a.is_uploaded())
        {
            return Some(exact);
        }

        let tag = platform_tag.to_lowercase();
        self.assets.iter().find(|asset| {
            let name = asset.name.to_lowercase();
            asset.is_uploaded()
                && name.contains(&tag)
                && (name.ends_with(".zip") || name.ends_with(".tar.gz") || name.ends_with(".tgz"))
        })
    }

    /// Finds an asset by exact name.
    #[must_use]
    pub fn find_named(&self, name: &str) -> Option<&GitHubAsset> {
        self.assets
            .iter()
            .find(|a| a.name == name && a.is_uploaded())
    }
}

/// Release asset data from the GitHub API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    /// Asset filename (e.g., "GrapplingOverlay-Windows.zip").
    pub name: String,

    /// Direct download URL.
    pub browser_download_url: String,

    /// Upload state: "uploaded" (complete) or "open" (still uploading).
    #[serde(default = "default_state")]
    pub state: String,

    /// SHA256 digest (format: "sha256:...").
    /// May be null if GitHub has not computed it yet.
    #[serde(default)]
    pub digest: Option<String>,

    /// File size in bytes.
    #[serde(default)]
    pub size: u64,
}

fn default_state() -> String {
    "uploaded".to_string()
}

impl GitHubAsset {
    /// Returns whether this asset is fully uploaded and ready for download.
    #[must_use]
    pub fn is_uploaded(&self) -> bool {
        self.state == "uploaded"
    }

    /// Returns the SHA256 hash from the digest field, if available.
    #[must_use]
    pub fn sha256(&self) -> Option<&str> {
        self.digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
    }
}

/// The `latest.json` manifest some releases publish next to the archive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChecksumManifest {
    /// Per-asset digests.
    #[serde(default)]
    pub assets: Vec<ManifestEntry>,
}

/// One entry of [`ChecksumManifest`].
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Asset file name.
    pub name: String,
    /// Hex SHA256 digest.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ChecksumManifest {
    /// Looks up the digest recorded for `asset_name`.
    #[must_use]
    pub fn digest_for(&self, asset_name: &str) -> Option<&str> {
        self.assets
            .iter()
            .find(|entry| entry.name == asset_name)
            .and_then(|entry| entry.sha256.as_deref())
    }
}

/// Extracts the hash from a `.sha256` sidecar file.
///
/// Accepts "hash  filename" (sha256sum output) or a bare hash.
#[must_use]
pub fn parse_sidecar(content: &str) -> Option<String> {
    content
        .split_whitespace()
        .next()
        .filter(|hash| hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_lowercase)
}
