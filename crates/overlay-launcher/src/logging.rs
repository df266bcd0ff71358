//! Logging setup for the launcher.
//!
//! The launcher normally runs without a console, so events are appended to
//! `<data root>/logs/launcher.log` unless stderr is requested. Messages shown
//! to the user after a failure point at that file.
//!
//! # Log Levels
//!
//! - `error`: failed updates, startup failures
//! - `warn`: fallbacks and best-effort steps that did not work
//! - `info`: launches, version switches, update milestones
//! - `debug`: state transitions, HTTP requests
//! - `trace`: store scanning

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Crates whose events are recorded at the configured level. Everything
/// else stays at `warn`.
const OWN_TARGETS: [&str; 3] = [
    "overlay_launcher",
    "grappling_overlay_launcher",
    "overlay_updater",
];

/// How and where to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum level recorded for the launcher crates.
    pub level_filter: LevelFilter,
    /// Let `RUST_LOG` replace the default filter.
    pub use_env_filter: bool,
    /// Prefix lines with a timestamp.
    pub with_timestamps: bool,
    /// Include the module path.
    pub with_target: bool,
    /// Colorize output.
    pub with_ansi: bool,
    /// Line format.
    pub format: LogFormat,
    /// Append to this file; `None` logs to stderr.
    pub log_file: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable format.
    Pretty,
    /// Single-line format.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level_filter: LevelFilter::INFO,
            use_env_filter: true,
            with_timestamps: true,
            with_target: false,
            with_ansi: false,
            format: LogFormat::default(),
            log_file: None,
        }
    }
}

impl LogConfig {
    /// Sets the log file (stderr when `None`).
    #[must_use]
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }
}

/// Installs the global subscriber.
///
/// Creates the log file's directory if needed. Calling this a second time
/// leaves the first subscriber in place.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_logging(config: &LogConfig) -> io::Result<()> {
    let writer = match &config.log_file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };
    init_logging_with_writer(config, writer);
    Ok(())
}

/// Installs the global subscriber writing to `writer`.
pub fn init_logging_with_writer<W>(config: &LogConfig, writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = build_env_filter(config.level_filter, config.use_env_filter);
    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.with_ansi && config.format != LogFormat::Json)
        .with_target(config.with_target);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (config.format, config.with_timestamps) {
        (LogFormat::Json, _) => base.json().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
    };

    if tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging already initialised");
    }
}

fn default_directives(level: LevelFilter) -> String {
    let level = level.to_string().to_lowercase();
    std::iter::once("warn".to_string())
        .chain(OWN_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_env_filter(level: LevelFilter, use_env: bool) -> EnvFilter {
    let from_env = use_env.then(|| EnvFilter::try_from_default_env().ok()).flatten();
    from_env.unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
