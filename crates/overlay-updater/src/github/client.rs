//! Blocking GitHub Releases client.

use std::io::Read;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

use super::types::{ChecksumManifest, GitHubAsset, GitHubRelease, parse_sidecar};
use crate::config::{RepoSlug, UpdateChannel, UpdaterConfig, platform_tag};
use crate::error::{Result, UpdateError};
use crate::source::{ReleaseDescriptor, ReleaseSource};
use crate::version::{VersionId, precedence};

/// User agent string for API requests.
const USER_AGENT_VALUE: &str = concat!(
    "grappling-overlay-launcher/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/GrapplingOverlay/OverlayApp)"
);

/// Name of the optional digest manifest asset.
const MANIFEST_ASSET: &str = "latest.json";

/// [`ReleaseSource`] backed by the GitHub Releases API.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    api: Client,
    downloads: Client,
    base_url: String,
    repo: RepoSlug,
    channel: UpdateChannel,
    asset_name: String,
}

impl GitHubSource {
    /// Creates a client for the repository and channel in `config`.
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let build = |timeout| {
            Client::builder()
                .default_headers(headers.clone())
                .connect_timeout(config.connect_timeout)
                .timeout(timeout)
                .build()
                .map_err(|e| UpdateError::Network(format!("failed to create HTTP client: {e}")))
        };

        Ok(Self {
            api: build(config.request_timeout)?,
            downloads: build(config.download_timeout)?,
            base_url: config.api_base_url.clone(),
            repo: config.repo.clone(),
            channel: config.channel,
            asset_name: config.asset_name.clone(),
        })
    }

    fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            self.base_url,
            self.repo.owner(),
            self.repo.repo()
        )
    }

    /// Fetches the newest non-draft release for the configured channel.
    pub fn latest_release(&self) -> Result<GitHubRelease> {
        match self.channel {
            UpdateChannel::Stable => {
                let url = format!("{}/latest", self.releases_url());
                tracing::debug!("Fetching latest release from {}", url);
                let response = check_status(self.api.get(&url).send()?)?;
                let release: GitHubRelease = response.json()?;
                if release.draft {
                    return Err(UpdateError::NotFound(format!(
                        "no published release for {}",
                        self.repo
                    )));
                }
                Ok(release)
            }
            UpdateChannel::Beta => {
                let url = self.releases_url();
                tracing::debug!("Fetching release list from {}", url);
                let response = check_status(self.api.get(&url).send()?)?;
                let releases: Vec<GitHubRelease> = response.json()?;
                releases
                    .into_iter()
                    .filter(|r| !r.draft)
                    .filter_map(|r| VersionId::from_tag(&r.tag_name).ok().map(|id| (id, r)))
                    .max_by(|(a, _), (b, _)| precedence(a, b))
                    .map(|(_, r)| r)
                    .ok_or_else(|| {
                        UpdateError::NotFound(format!("no published release for {}", self.repo))
                    })
            }
        }
    }

    /// Resolves the expected digest of `archive`.
    ///
    /// Order: the asset's own `digest` field, the `latest.json` manifest, a
    /// `<asset>.sha256` sidecar. Failures fetching the fallbacks are logged
    /// and treated as "no digest".
    fn resolve_digest(&self, release: &GitHubRelease, archive: &GitHubAsset) -> Option<String> {
        if let Some(hash) = archive.sha256() {
            return Some(hash.to_lowercase());
        }

        if let Some(manifest_asset) = release.find_named(MANIFEST_ASSET) {
            match self.fetch_manifest(manifest_asset) {
                Ok(manifest) => {
                    if let Some(hash) = manifest.digest_for(&archive.name) {
                        return Some(hash.to_lowercase());
                    }
                }
                Err(e) => tracing::warn!("Could not read {}: {}", MANIFEST_ASSET, e),
            }
        }

        let sidecar_name = format!("{}.sha256", archive.name);
        if let Some(sidecar) = release.find_named(&sidecar_name) {
            match self.fetch_text(&sidecar.browser_download_url) {
                Ok(text) => {
                    if let Some(hash) = parse_sidecar(&text) {
                        return Some(hash);
                    }
                    tracing::warn!("{} does not contain a SHA256 hash", sidecar_name);
                }
                Err(e) => tracing::warn!("Could not read {}: {}", sidecar_name, e),
            }
        }

        None
    }

    fn fetch_manifest(&self, asset: &GitHubAsset) -> Result<ChecksumManifest> {
        let text = self.fetch_text(&asset.browser_download_url)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .api
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()?;
        Ok(check_status(response)?.text()?)
    }
}

impl ReleaseSource for GitHubSource {
    fn get_latest(&self) -> Result<ReleaseDescriptor> {
        let release = self.latest_release()?;
        let version = VersionId::from_tag(&release.tag_name)?;

        let archive = release
            .find_archive(&self.asset_name, platform_tag())
            .ok_or_else(|| {
                UpdateError::NotFound(format!(
                    "release {} has no asset named {}",
                    release.tag_name, self.asset_name
                ))
            })?;

        let sha256 = self.resolve_digest(&release, archive);
        if sha256.is_none() {
            tracing::warn!("No checksum published for asset: {}", archive.name);
        }

        Ok(ReleaseDescriptor {
            version,
            tag: release.tag_name.clone(),
            asset_name: archive.name.clone(),
            download_url: archive.browser_download_url.clone(),
            size: archive.size,
            sha256,
            prerelease: release.prerelease,
            notes: release.changelog().to_string(),
            html_url: release.html_url.clone(),
        })
    }

    fn open(&self, release: &ReleaseDescriptor) -> Result<Box<dyn Read + Send>> {
        tracing::debug!("Opening {}", release.download_url);
        let response = self
            .downloads
            .get(&release.download_url)
            .header(ACCEPT, "application/octet-stream")
            .send()?;
        Ok(Box::new(check_status(response)?))
    }

    fn describe(&self) -> String {
        format!("GitHub {}", self.repo)
    }
}

/// Maps error statuses to [`UpdateError`] variants.
fn check_status(response: Response) -> Result<Response> {
    let status = response.status();

    let limit_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .is_some_and(|remaining| remaining.to_str().unwrap_or("1") == "0");
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && limit_exhausted)
    {
        let retry_after = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .map(|reset| reset.saturating_sub(chrono::Utc::now().timestamp()).max(0) as u64)
            .unwrap_or(60);

        return Err(UpdateError::RateLimited { retry_after });
    }

    if status == StatusCode::NOT_FOUND {
        return Err(UpdateError::NotFound(format!(
            "{} returned 404",
            response.url()
        )));
    }

    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(UpdateError::Network(format!(
            "GitHub API error ({status}): {body}"
        )));
    }

    Ok(response)
}
