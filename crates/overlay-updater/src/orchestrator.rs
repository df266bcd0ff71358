//! Update orchestration.
//!
//! One [`Updater::update`] call walks the state machine
//!
//! ```text
//! Idle -> Checking -> Downloading -> Installing -> SwitchingOver -> Relaunching -> Idle
//!            \             \              \              \
//!             +-------------+--------------+--------------+--> Failed -> Idle
//! ```
//!
//! Nothing is retried automatically. The current pointer only changes in
//! `SwitchingOver`, after the new version is fully installed, so a failure
//! anywhere leaves the previously working version selected.

use std::fs;
use std::path::PathBuf;

use crate::config::{UpdateChannel, UpdaterConfig};
use crate::error::{Result, UpdateError};
use crate::source::{ReleaseDescriptor, ReleaseSource};
use crate::status::UpdateStatus;
use crate::steps::download::CancelToken;
use crate::store::{DOWNLOADS_DIR, InstalledVersion, Payload, VersionStore};
use crate::version::{Comparison, VersionId, compare};

/// Orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Asking the release source for the latest release.
    Checking,
    /// Receiving the archive.
    Downloading {
        /// Version being downloaded.
        version: VersionId,
        /// Bytes received so far.
        downloaded: u64,
        /// Total bytes (0 when unknown).
        total: u64,
    },
    /// Extracting into the version store. Cancellation is deferred.
    Installing {
        /// Version being installed.
        version: VersionId,
    },
    /// Rewriting the current pointer.
    SwitchingOver {
        /// Version becoming current.
        version: VersionId,
    },
    /// Starting the new version.
    Relaunching {
        /// Version being started.
        version: VersionId,
    },
    /// The attempt failed; the previous version is still current.
    Failed {
        /// Human-readable reason including the log location.
        reason: String,
    },
}

impl UpdateState {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Checking => "Checking",
            Self::Downloading { .. } => "Downloading",
            Self::Installing { .. } => "Installing",
            Self::SwitchingOver { .. } => "SwitchingOver",
            Self::Relaunching { .. } => "Relaunching",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        use UpdateState::{
            Checking, Downloading, Failed, Idle, Installing, Relaunching, SwitchingOver,
        };
        matches!(
            (self, next),
            (Idle, Checking)
                | (Checking, Idle | Downloading { .. } | Failed { .. })
                | (Downloading { .. }, Downloading { .. } | Installing { .. } | Failed { .. })
                | (Installing { .. }, SwitchingOver { .. } | Failed { .. })
                | (SwitchingOver { .. }, Relaunching { .. } | Failed { .. })
                | (Relaunching { .. }, Idle)
                | (Failed { .. }, Idle)
        )
    }
}

/// Result of a manual check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The installed version is the latest one offered.
    UpToDate {
        /// Installed version.
        current: Option<VersionId>,
        /// Latest published version.
        latest: VersionId,
    },
    /// A newer (or different) release is available.
    Available {
        /// Installed version, if any.
        current: Option<VersionId>,
        /// The release that would be installed.
        release: ReleaseDescriptor,
    },
}

/// Result of an update attempt.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Nothing to do.
    UpToDate {
        /// Installed version.
        current: Option<VersionId>,
    },
    /// The new version is installed and current.
    Updated {
        /// Version that was current before.
        previous: Option<VersionId>,
        /// Newly current version.
        current: InstalledVersion,
        /// Set when the relaunch step failed after a successful switch.
        relaunch_error: Option<String>,
    },
    /// The attempt failed and the pointer is unchanged.
    Failed {
        /// Human-readable reason including the log location.
        reason: String,
        /// Underlying error.
        error: UpdateError,
    },
}

type Observer = Box<dyn FnMut(&UpdateState) + Send>;

/// Holds the current state and notifies the observer on every change.
struct StateMachine {
    state: UpdateState,
    observer: Option<Observer>,
}

impl StateMachine {
    fn transition(&mut self, next: UpdateState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {} -> {}",
            self.state.name(),
            next.name()
        );
        if self.state.name() != next.name() {
            tracing::debug!("Update state: {} -> {}", self.state.name(), next.name());
        }
        self.state = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.state);
        }
    }
}

/// Drives check, download, install, switch-over and relaunch.
pub struct Updater<S> {
    source: S,
    store: VersionStore,
    channel: UpdateChannel,
    retain_versions: usize,
    log_file: PathBuf,
    cancel: CancelToken,
    machine: StateMachine,
}

impl<S: ReleaseSource> Updater<S> {
    /// Creates an idle updater.
    ///
    /// `log_file` is named in failure reasons and the status record.
    pub fn new(
        source: S,
        store: VersionStore,
        config: &UpdaterConfig,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            store,
            channel: config.channel,
            retain_versions: config.retain_versions,
            log_file: log_file.into(),
            cancel: CancelToken::new(),
            machine: StateMachine {
                state: UpdateState::Idle,
                observer: None,
            },
        }
    }

    /// Uses an externally owned cancel token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a callback invoked after every state change.
    #[must_use]
    pub fn on_state_change(mut self, observer: impl FnMut(&UpdateState) + Send + 'static) -> Self {
        self.machine.observer = Some(Box::new(observer));
        self
    }

    /// A handle that cancels the running attempt.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &UpdateState {
        &self.machine.state
    }

    /// The version store being updated.
    #[must_use]
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Manual "check for updates": reports without installing anything.
    pub fn check(&mut self) -> Result<CheckOutcome> {
        self.machine.transition(UpdateState::Checking);
        match self.evaluate() {
            Ok(outcome) => {
                self.machine.transition(UpdateState::Idle);
                Ok(outcome)
            }
            Err(e) => {
                let reason = self.failure_reason(&e);
                tracing::error!("Update check failed: {}", e);
                self.machine.transition(UpdateState::Failed { reason });
                self.machine.transition(UpdateState::Idle);
                Err(e)
            }
        }
    }

    /// Runs one full update attempt.
    ///
    /// `relaunch` is called with the new current version once the pointer
    /// has been switched. Its failure does not undo the update; it is
    /// reported as `relaunch_error` of [`UpdateOutcome::Updated`].
    pub fn update<F>(&mut self, relaunch: F) -> UpdateOutcome
    where
        F: FnOnce(&InstalledVersion) -> Result<()>,
    {
        let previous = self.store.current_id().ok().flatten();

        self.machine.transition(UpdateState::Checking);
        let release = match self.evaluate() {
            Ok(CheckOutcome::Available { release, .. }) => release,
            Ok(CheckOutcome::UpToDate { current, latest }) => {
                tracing::info!("Already up to date (latest: {})", latest);
                self.machine.transition(UpdateState::Idle);
                return UpdateOutcome::UpToDate { current };
            }
            Err(e) => return self.fail(e, None, previous),
        };

        let installed = match self.download_and_install(&release) {
            Ok(installed) => installed,
            Err(e) => return self.fail(e, Some(release.version), previous),
        };

        // Cancellation requested during install takes effect here.
        if self.cancel.is_cancelled() {
            tracing::info!("Update cancelled after installing {}", installed.id);
            return self.fail(UpdateError::Cancelled, Some(release.version), previous);
        }

        self.machine.transition(UpdateState::SwitchingOver {
            version: installed.id.clone(),
        });
        if let Err(e) = self.store.set_current(&installed.id) {
            return self.fail(e, Some(release.version), previous);
        }

        let status = UpdateStatus::success(
            installed.id.clone(),
            previous.clone(),
            self.log_file.clone(),
        );
        if let Err(e) = status.write(self.store.app_dir()) {
            tracing::warn!("Failed to write update status: {}", e);
        }
        match self.store.prune(self.retain_versions) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!("Removed old versions: {:?}", removed);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Retention cleanup failed: {}", e),
        }

        self.machine.transition(UpdateState::Relaunching {
            version: installed.id.clone(),
        });
        let relaunch_error = relaunch(&installed).err().map(|e| {
            tracing::error!("Relaunch of {} failed: {}", installed.id, e);
            e.to_string()
        });
        self.machine.transition(UpdateState::Idle);

        tracing::info!(
            "Updated {} -> {}",
            previous.as_ref().map_or("(none)", VersionId::as_str),
            installed.id
        );
        UpdateOutcome::Updated {
            previous,
            current: installed,
            relaunch_error,
        }
    }

    fn evaluate(&self) -> Result<CheckOutcome> {
        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        tracing::info!("Checking {} for updates", self.source.describe());
        let release = self.source.get_latest()?;
        let current = self.store.current_id()?;

        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let offered = self.channel.includes(release.version.parsed().as_ref())
            && !(release.prerelease && self.channel == UpdateChannel::Stable);
        if !offered {
            tracing::debug!(
                "Skipping {} (not in {} channel)",
                release.version,
                self.channel.label()
            );
            return Ok(CheckOutcome::UpToDate {
                current,
                latest: release.version,
            });
        }

        let comparison = current
            .as_ref()
            .map_or(Comparison::Newer, |installed| compare(installed, &release.version));
        tracing::debug!(
            "Installed {:?}, latest {} ({:?})",
            current,
            release.version,
            comparison
        );

        if comparison.is_update() {
            Ok(CheckOutcome::Available { current, release })
        } else {
            Ok(CheckOutcome::UpToDate {
                current,
                latest: release.version,
            })
        }
    }

    fn download_and_install(&mut self, release: &ReleaseDescriptor) -> Result<InstalledVersion> {
        let version = release.version.clone();
        self.machine.transition(UpdateState::Downloading {
            version: version.clone(),
            downloaded: 0,
            total: release.size,
        });

        let dest = self
            .store
            .app_dir()
            .join(DOWNLOADS_DIR)
            .join(format!("{}.part", release.asset_name));
        let machine = &mut self.machine;
        let archive = self.source.download(
            release,
            &dest,
            &mut |progress| {
                machine.transition(UpdateState::Downloading {
                    version: version.clone(),
                    downloaded: progress.downloaded,
                    total: progress.total,
                });
            },
            &self.cancel,
        )?;

        self.machine.transition(UpdateState::Installing {
            version: version.clone(),
        });
        let installed = self
            .store
            .install(&version, &Payload::Archive(archive.path.clone()));
        if let Err(e) = fs::remove_file(&archive.path) {
            tracing::warn!("Failed to remove {}: {}", archive.path.display(), e);
        }
        installed
    }

    fn failure_reason(&self, error: &UpdateError) -> String {
        format!(
            "{} ({error}). See {} for details.",
            error.user_message(),
            self.log_file.display()
        )
    }

    fn fail(
        &mut self,
        error: UpdateError,
        version: Option<VersionId>,
        previous: Option<VersionId>,
    ) -> UpdateOutcome {
        let reason = self.failure_reason(&error);
        tracing::error!("Update failed: {}", error);

        let status = UpdateStatus::failure(version, previous, error.to_string(), self.log_file.clone());
        if let Err(e) = status.write(self.store.app_dir()) {
            tracing::warn!("Failed to write update status: {}", e);
        }

        self.machine.transition(UpdateState::Failed {
            reason: reason.clone(),
        });
        self.machine.transition(UpdateState::Idle);
        UpdateOutcome::Failed { reason, error }
    }
}
