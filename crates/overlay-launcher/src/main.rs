//! GrapplingOverlay launcher.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use clap::{ColorChoice, Parser};
use overlay_launcher::LauncherConfig;
use overlay_launcher::logging::{LogConfig, LogFormat, init_logging};
use tracing::level_filters::LevelFilter;

mod cli;
mod commands;

use crate::cli::{Cli, Command, LaunchArgs, LogFormatArg, LogLevelArg};

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.color.write_global();

    let config = match LauncherConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let log_config = log_config_from_cli(&cli, &config);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        return ExitCode::FAILURE;
    }
    tracing::debug!("Launcher {} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        None => commands::run_launch(
            &config,
            LaunchArgs {
                detach: false,
                app_args: cli.app_args,
            },
        ),
        Some(Command::Launch(args)) => commands::run_launch(&config, args),
        Some(Command::Check) => commands::run_check(&config),
        Some(Command::Update { launch }) => commands::run_update(&config, launch),
        Some(Command::Versions) => commands::run_versions(&config),
        Some(Command::Remove { id }) => commands::run_remove(&config, &id),
        Some(Command::Prune { keep }) => commands::run_prune(&config, keep),
        Some(Command::Rollback) => commands::run_rollback(&config),
        Some(Command::Status) => commands::run_status(&config),
        Some(Command::SelfTest) => Ok(commands::run_self_test(&config)),
        Some(Command::Paths) => commands::run_paths(&config),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(error) => {
            tracing::error!("{error:#}");
            eprintln!("{}", commands::failure_line(&error, &config.log_file()));
            ExitCode::FAILURE
        }
    }
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli, config: &LauncherConfig) -> LogConfig {
    let mut log_config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    log_config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        log_config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    log_config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    log_config.log_file = if cli.log_stderr {
        None
    } else {
        Some(cli.log_file.clone().unwrap_or_else(|| config.log_file()))
    };
    log_config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => log_config.log_file.is_none() && io::stderr().is_terminal(),
    };
    log_config
}
