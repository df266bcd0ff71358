//! Launcher entry point: bootstrap, version resolution and the run loop.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;

use overlay_updater::{
    InstalledVersion, Payload, ReleaseSource, Result, UpdateError, UpdateOutcome, UpdateState,
    Updater, VersionId, VersionStore,
};

use crate::config::LauncherConfig;
use crate::launch::{self, ChildExit};
use crate::request::UpdateRequest;

/// Owns the data root and the version store for one launcher process.
#[derive(Debug)]
pub struct Launcher {
    config: LauncherConfig,
    store: VersionStore,
}

impl Launcher {
    /// Creates the data root layout and opens the version store.
    pub fn new(config: LauncherConfig) -> Result<Self> {
        config.data_root.ensure()?;
        let store = VersionStore::open(config.data_root.app_dir(), &config.executable_name)?;
        Ok(Self { config, store })
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// The version store.
    #[must_use]
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Makes sure the current pointer names an installed version.
    ///
    /// On a fresh machine (or when the pointer is missing or malformed) the
    /// bundled application is installed as version `0` and selected. If
    /// that id is already installed, or the bundle is missing or cannot be
    /// installed, the known-good version is selected, else the newest
    /// runnable one.
    pub fn ensure_installed(&self) -> Result<InstalledVersion> {
        if let Some(id) = self.store.current_id()? {
            if self.store.contains(&id) {
                return self.store.get(&id);
            }
            tracing::warn!("Current pointer names missing version {}", id);
        }

        if let Some(bundle) = self.bundle_root() {
            let id = &self.config.bundled_version;
            if self.store.contains(id) {
                tracing::info!("Bundled version {} is already installed", id);
            } else {
                tracing::info!("Installing bundled application as version {}", id);
                match self.store.install(id, &Payload::Directory(bundle)) {
                    Ok(installed) => {
                        self.store.set_current(&installed.id)?;
                        return Ok(installed);
                    }
                    Err(e) => tracing::error!("Failed to install bundled application: {}", e),
                }
            }
        }

        let known_good = match self.store.known_good_id()? {
            Some(id) if self.store.contains(&id) => Some(self.store.get(&id)?),
            _ => None,
        };
        let selected = match known_good.filter(InstalledVersion::is_runnable) {
            Some(version) => Some(version),
            None => self.store.latest_installed(&[])?,
        };
        match selected {
            Some(version) => {
                tracing::warn!("Selecting installed version {}", version.id);
                self.store.set_current(&version.id)?;
                Ok(version)
            }
            None => Err(self.startup_error("no runnable version of the application is installed")),
        }
    }

    /// Resolves the version to start, falling back when the current one is
    /// not runnable.
    pub fn resolve_startup(&self) -> Result<InstalledVersion> {
        let current = self.ensure_installed()?;
        if current.is_runnable() {
            return Ok(current);
        }
        tracing::error!(
            "Executable of version {} is missing: {}",
            current.id,
            current.executable.display()
        );
        self.fall_back(&mut vec![current.id])
    }

    /// Selects the known-good version, else the newest other installed
    /// version, skipping everything in `tried`. The current pointer is
    /// switched to the result.
    pub fn fall_back(&self, tried: &mut Vec<VersionId>) -> Result<InstalledVersion> {
        if let Some(id) = self.store.known_good_id()?
            && !tried.contains(&id)
            && self.store.contains(&id)
        {
            let candidate = self.store.get(&id)?;
            if candidate.is_runnable() {
                return self.switch_to(candidate);
            }
            tried.push(id);
        }

        match self.store.latest_installed(tried)? {
            Some(candidate) => self.switch_to(candidate),
            None => Err(self.startup_error("no runnable version of the application is installed")),
        }
    }

    fn switch_to(&self, version: InstalledVersion) -> Result<InstalledVersion> {
        tracing::warn!("Falling back to version {}", version.id);
        self.store.set_current(&version.id)?;
        Ok(version)
    }

    /// Starts the resolved version, falling back if it fails to spawn.
    pub fn start(&self, args: &[OsString]) -> Result<(InstalledVersion, Child)> {
        let version = self.resolve_startup()?;
        self.spawn_or_fall_back(version, args, &mut Vec::new())
    }

    fn spawn_or_fall_back(
        &self,
        mut version: InstalledVersion,
        args: &[OsString],
        tried: &mut Vec<VersionId>,
    ) -> Result<(InstalledVersion, Child)> {
        let request_file = UpdateRequest::path(self.store.app_dir());
        loop {
            match launch::spawn(&version, args, &request_file) {
                Ok(child) => return Ok((version, child)),
                Err(e) => {
                    tracing::error!("{}", e);
                    tried.push(version.id.clone());
                    version = self.fall_back(tried)?;
                }
            }
        }
    }

    /// Waits for the child to finish.
    ///
    /// The version becomes known-good once the child has outlived the
    /// startup grace period or exited cleanly. A version that is not yet
    /// known-good and fails within the grace period is reported as
    /// [`ChildExit::StartupFailed`].
    pub fn supervise(&self, version: &InstalledVersion, mut child: Child) -> Result<ChildExit> {
        let (status, early) = match launch::wait_for_startup(&mut child, self.config.startup_grace)? {
            Some(status) => (status, true),
            None => {
                self.mark_known_good(&version.id);
                (child.wait()?, false)
            }
        };

        let code = status.code();
        let clean = code == Some(0) || code == Some(self.config.update_exit_code);
        let untrusted = self.store.known_good_id().ok().flatten().as_ref() != Some(&version.id);
        if clean {
            self.mark_known_good(&version.id);
        }

        let request = UpdateRequest::take(self.store.app_dir())?;
        let exit = if request.is_none() && early && !clean && untrusted {
            ChildExit::StartupFailed(code)
        } else {
            ChildExit::classify(status, self.config.update_exit_code, request.is_some())
        };
        tracing::info!("Version {} exited with {:?} ({:?})", version.id, code, exit);
        Ok(exit)
    }

    fn mark_known_good(&self, id: &VersionId) {
        if self.store.known_good_id().ok().flatten().as_ref() == Some(id) {
            return;
        }
        match self.store.set_known_good(id) {
            Ok(()) => tracing::debug!("Version {} marked known-good", id),
            Err(e) => tracing::warn!("Failed to record known-good version {}: {}", id, e),
        }
    }

    /// An updater over this launcher's store.
    pub fn updater<S: ReleaseSource>(&self, source: S) -> Updater<S> {
        Updater::new(
            source,
            self.store.clone(),
            &self.config.updater,
            self.config.log_file(),
        )
    }

    /// Runs the application until it exits without asking for an update.
    ///
    /// With `detach` the child is started and left running. Returns the
    /// exit code to report.
    pub fn run<S: ReleaseSource>(
        &self,
        source: &S,
        args: &[OsString],
        detach: bool,
        on_state: impl FnMut(&UpdateState) + Clone + Send + 'static,
    ) -> Result<i32> {
        // A request left by a crashed session is served before starting.
        if UpdateRequest::take(self.store.app_dir())?.is_some() {
            tracing::info!("Serving update request left by a previous session");
            self.serve_update(source, on_state.clone(), None);
        }

        let (mut version, mut child) = self.start(args)?;
        if detach {
            tracing::info!("Detached from version {} (pid {})", version.id, child.id());
            return Ok(0);
        }

        // Versions that failed to start during this run.
        let mut failed = Vec::new();
        loop {
            match self.supervise(&version, child)? {
                ChildExit::Exited(code) => return Ok(code.unwrap_or(1)),
                ChildExit::StartupFailed(code) => {
                    tracing::error!("Version {} failed to start (exit {:?})", version.id, code);
                    failed.push(version.id.clone());
                    let fallback = match self.fall_back(&mut failed) {
                        Ok(fallback) => fallback,
                        Err(e) => {
                            tracing::error!("{}", e);
                            return Ok(code.unwrap_or(1));
                        }
                    };
                    (version, child) = self.spawn_or_fall_back(fallback, args, &mut failed)?;
                }
                ChildExit::UpdateRequested if !failed.is_empty() => {
                    // Updating now would select the version that just failed.
                    tracing::warn!(
                        "Not updating after a failed start of {:?}; exiting",
                        failed
                    );
                    return Ok(0);
                }
                ChildExit::UpdateRequested => {
                    tracing::info!("Update requested by version {}", version.id);
                    let mut relaunched = None;
                    self.serve_update(source, on_state.clone(), Some((args, &mut relaunched)));
                    (version, child) = match relaunched {
                        Some(started) => started,
                        None => self.start(args)?,
                    };
                }
            }
        }
    }

    /// Runs one update attempt. When `relaunch` is given, the new version is
    /// started as part of the attempt and handed back through it.
    fn serve_update<S: ReleaseSource>(
        &self,
        source: &S,
        on_state: impl FnMut(&UpdateState) + Send + 'static,
        relaunch: Option<(&[OsString], &mut Option<(InstalledVersion, Child)>)>,
    ) {
        let mut updater = self.updater(source).on_state_change(on_state);
        let request_file = UpdateRequest::path(self.store.app_dir());

        let outcome = updater.update(|installed| match relaunch {
            Some((args, slot)) => {
                let child = launch::spawn(installed, args, &request_file)?;
                *slot = Some((installed.clone(), child));
                Ok(())
            }
            None => Ok(()),
        });

        match outcome {
            UpdateOutcome::UpToDate { current } => {
                tracing::info!("No update needed (current: {:?})", current);
            }
            UpdateOutcome::Updated {
                previous,
                current,
                relaunch_error,
            } => {
                tracing::info!("Updated {:?} -> {}", previous, current.id);
                if let Some(error) = relaunch_error {
                    tracing::error!("Relaunch of {} failed: {}", current.id, error);
                }
            }
            UpdateOutcome::Failed { reason, .. } => {
                tracing::error!("{}", reason);
            }
        }
    }

    /// Copies the launcher executable into the data root so it survives
    /// removal of the folder it was started from. Best effort.
    pub fn copy_self_to_data_root(&self) -> Option<PathBuf> {
        let source = self.config.launcher_exe.as_ref()?;
        let name = source.file_name()?;
        let dest = self.config.data_root.path().join(name);
        if source.starts_with(self.config.data_root.path()) {
            return None;
        }

        match copy_if_changed(source, &dest) {
            Ok(true) => {
                tracing::info!("Copied launcher to {}", dest.display());
                Some(dest)
            }
            Ok(false) => Some(dest),
            Err(e) => {
                tracing::warn!("Could not copy launcher to {}: {}", dest.display(), e);
                None
            }
        }
    }

    fn startup_error(&self, message: &str) -> UpdateError {
        UpdateError::Startup(format!(
            "{message}. See {} for details.",
            self.config.log_file().display()
        ))
    }

    fn bundle_root(&self) -> Option<PathBuf> {
        let dir = self.config.bundle_dir.as_ref()?;
        self.store.locate_bundle_root(dir)
    }
}

/// Copies `source` to `dest` through a temporary file unless the contents
/// already match. Returns whether a copy was made.
fn copy_if_changed(source: &Path, dest: &Path) -> io::Result<bool> {
    let bytes = fs::read(source)?;
    if fs::read(dest).is_ok_and(|existing| existing == bytes) {
        return Ok(false);
    }

    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::other("destination has no parent directory"))?;
    let partial = parent.join(format!(
        ".{}.partial",
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    fs::copy(source, &partial)?;
    if let Err(e) = fs::rename(&partial, dest) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    Ok(true)
}
