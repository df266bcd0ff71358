//! Release source abstraction.
//!
//! A [`ReleaseSource`] only reports what the latest release is and hands out
//! its bytes. Deciding whether that release is newer than what is installed
//! is the orchestrator's job.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::steps::download::{
    CancelToken, DownloadProgress, DownloadTarget, DownloadedArchive, stream_to_file,
};
use crate::version::VersionId;

/// Metadata about one published release archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Identifier the release installs as.
    pub version: VersionId,
    /// Tag the release was published under (e.g. "v1.3.0").
    pub tag: String,
    /// File name of the archive asset.
    pub asset_name: String,
    /// Direct download URL of the archive.
    pub download_url: String,
    /// Archive size in bytes (0 when unknown).
    pub size: u64,
    /// Expected SHA256 digest, if published.
    pub sha256: Option<String>,
    /// Whether the release is marked as a pre-release.
    pub prerelease: bool,
    /// Release notes in markdown.
    pub notes: String,
    /// Release page URL.
    pub html_url: Option<String>,
}

/// Anything that can report and deliver the latest release.
pub trait ReleaseSource {
    /// Returns the latest release for the configured channel.
    ///
    /// Fails with [`UpdateError::NotFound`](crate::UpdateError::NotFound)
    /// when no release exists.
    fn get_latest(&self) -> Result<ReleaseDescriptor>;

    /// Opens the archive bytes of `release` as a stream.
    fn open(&self, release: &ReleaseDescriptor) -> Result<Box<dyn Read + Send>>;

    /// Short human-readable name used in logs.
    fn describe(&self) -> String {
        "release source".to_string()
    }

    /// Downloads the archive of `release` to `dest`, verifying its size and
    /// digest. The file at `dest` is removed if anything goes wrong.
    fn download(
        &self,
        release: &ReleaseDescriptor,
        dest: &Path,
        progress: &mut dyn FnMut(DownloadProgress),
        cancel: &CancelToken,
    ) -> Result<DownloadedArchive> {
        tracing::info!(
            "Downloading {} {} from {}",
            release.asset_name,
            release.version,
            self.describe()
        );
        let mut reader = self.open(release)?;
        stream_to_file(
            &mut reader,
            DownloadTarget {
                dest,
                expected_size: release.size,
                expected_digest: release.sha256.as_deref(),
            },
            progress,
            cancel,
        )
    }
}

impl<S: ReleaseSource + ?Sized> ReleaseSource for &S {
    fn get_latest(&self) -> Result<ReleaseDescriptor> {
        (**self).get_latest()
    }

    fn open(&self, release: &ReleaseDescriptor) -> Result<Box<dyn Read + Send>> {
        (**self).open(release)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn download(
        &self,
        release: &ReleaseDescriptor,
        dest: &Path,
        progress: &mut dyn FnMut(DownloadProgress),
        cancel: &CancelToken,
    ) -> Result<DownloadedArchive> {
        (**self).download(release, dest, progress, cancel)
    }
}
