//! CLI argument definitions for the GrapplingOverlay launcher.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "grappling-overlay-launcher",
    version,
    about = "GrapplingOverlay launcher - start, update and manage installed versions",
    long_about = "Start the installed GrapplingOverlay version and keep it up to date.\n\n\
                  Without a subcommand the current version is launched and any\n\
                  arguments are passed through to it (e.g. --headless, --test).",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments passed through to the application.
    #[arg(
        value_name = "APP_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub app_args: Vec<OsString>,

    /// Adjust log verbosity (-v for debug, -vv for trace, -q for warnings only).
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format.
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "compact",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to this file instead of <data root>/logs/launcher.log.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Write logs to stderr instead of the log file.
    #[arg(long = "log-stderr", global = true, conflicts_with = "log_file")]
    pub log_stderr: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the current version (the default).
    Launch(LaunchArgs),

    /// Check for a newer release without installing it.
    Check,

    /// Download and install the latest release.
    Update {
        /// Start the new version (detached) once it is installed.
        #[arg(long)]
        launch: bool,
    },

    /// List installed versions.
    Versions,

    /// Remove an installed version.
    Remove {
        /// Version identifier, as shown by `versions`.
        #[arg(value_name = "VERSION")]
        id: String,
    },

    /// Remove old versions, keeping current, known-good and the newest others.
    Prune {
        /// Number of other versions to keep.
        #[arg(long, default_value_t = 1)]
        keep: usize,
    },

    /// Switch back to the known-good (or newest other) version.
    Rollback,

    /// Show the current version and the result of the last update.
    Status,

    /// Verify the bundle and the data root.
    SelfTest,

    /// Print the resolved paths.
    Paths,
}

#[derive(Parser, Default)]
pub struct LaunchArgs {
    /// Start the application and exit without supervising it.
    #[arg(long)]
    pub detach: bool,

    /// Arguments passed through to the application.
    #[arg(
        value_name = "APP_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub app_args: Vec<OsString>,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
