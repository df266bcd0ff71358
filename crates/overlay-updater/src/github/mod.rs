//! GitHub Releases implementation of [`ReleaseSource`](crate::ReleaseSource).

pub mod client;
pub mod types;

pub use client::GitHubSource;
pub use types::{ChecksumManifest, GitHubAsset, GitHubRelease};
