//! Starting and supervising the application process.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use overlay_updater::{InstalledVersion, Result, UpdateError};

/// Set to `1` in the application's environment.
pub const LAUNCHER_ENV: &str = "GRAPPLING_OVERLAY_LAUNCHER";

/// Path of the update request file, passed to the application.
pub const UPDATE_REQUEST_ENV: &str = "GRAPPLING_OVERLAY_UPDATE_REQUEST";

/// Identifier of the version being run, passed to the application.
pub const VERSION_ENV: &str = "GRAPPLING_OVERLAY_VERSION";

/// Exit code (`EX_TEMPFAIL`) with which the application asks for an update.
pub const UPDATE_EXIT_CODE: i32 = 75;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the application process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Exited on its own; `None` when killed by a signal.
    Exited(Option<i32>),
    /// Asked for an update by exit code or request file.
    UpdateRequested,
    /// A version not yet known to work failed within the startup grace
    /// period.
    StartupFailed(Option<i32>),
}

impl ChildExit {
    /// Classifies a finished child.
    #[must_use]
    pub fn classify(status: ExitStatus, update_exit_code: i32, request_pending: bool) -> Self {
        if request_pending || status.code() == Some(update_exit_code) {
            Self::UpdateRequested
        } else {
            Self::Exited(status.code())
        }
    }
}

/// Starts `version`'s executable with `args`.
///
/// The working directory is the executable's own directory so the bundle
/// finds its resources.
pub fn spawn(version: &InstalledVersion, args: &[OsString], request_file: &Path) -> Result<Child> {
    if !version.is_runnable() {
        return Err(UpdateError::Startup(format!(
            "executable for version {} is missing: {}",
            version.id,
            version.executable.display()
        )));
    }

    let workdir = version.executable.parent().unwrap_or(&version.path);
    tracing::info!(
        "Starting version {}: {} {:?}",
        version.id,
        version.executable.display(),
        args
    );

    Command::new(&version.executable)
        .args(args)
        .current_dir(workdir)
        .env(LAUNCHER_ENV, "1")
        .env(UPDATE_REQUEST_ENV, request_file)
        .env(VERSION_ENV, version.id.as_str())
        .spawn()
        .map_err(|e| {
            UpdateError::Startup(format!(
                "failed to start {}: {e}",
                version.executable.display()
            ))
        })
}

/// Polls `child` for up to `grace`.
///
/// Returns the exit status if it exited within that time, `None` if it is
/// still running.
pub fn wait_for_startup(child: &mut Child, grace: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
