//! Version store and self-update engine for the GrapplingOverlay launcher.
//!
//! The launcher keeps every installed build of the application in its own
//! directory under the per-user data root and selects the active one with a
//! small pointer file. Updating means downloading a release archive,
//! installing it beside the existing versions and swapping the pointer.
//!
//! # Overview
//!
//! - [`DataRoot`] resolves the persistent per-user directory layout.
//! - [`VersionStore`] installs, lists and removes versions and owns the
//!   current and known-good pointers.
//! - [`ReleaseSource`] reports the latest release and streams its archive;
//!   [`GitHubSource`] implements it against the GitHub Releases API.
//! - [`Updater`] runs the check, download, install, switch-over and
//!   relaunch sequence as an explicit state machine.
//!
//! # Example
//!
//! ```no_run
//! use overlay_updater::{DataRoot, GitHubSource, Updater, UpdaterConfig, VersionStore};
//!
//! fn run() -> overlay_updater::Result<()> {
//!     let config = UpdaterConfig::from_env()?;
//!     let root = DataRoot::resolve(None);
//!     root.ensure()?;
//!
//!     let store = VersionStore::open(root.app_dir(), "GrapplingOverlay.exe")?;
//!     let source = GitHubSource::new(&config)?;
//!     let mut updater = Updater::new(source, store, &config, root.launcher_log());
//!
//!     let outcome = updater.update(|installed| {
//!         println!("now running {}", installed.id);
//!         Ok(())
//!     });
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod error;
pub mod paths;
pub mod status;
pub mod store;
pub mod version;

// Update engine
pub mod orchestrator;
pub mod source;
pub mod steps;

// GitHub API
pub mod github;

pub use config::{RepoSlug, UpdateChannel, UpdaterConfig};
pub use error::{Result, UpdateError};
pub use github::GitHubSource;
pub use orchestrator::{CheckOutcome, UpdateOutcome, UpdateState, Updater};
pub use paths::DataRoot;
pub use source::{ReleaseDescriptor, ReleaseSource};
pub use status::UpdateStatus;
pub use steps::download::{CancelToken, DownloadProgress, format_bytes};
pub use store::{InstalledVersion, Payload, VersionStore, default_executable_name};
pub use version::{Comparison, Version, VersionId};
