use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

use overlay_launcher::launch;
use overlay_launcher::{Launcher, LauncherConfig, UpdateRequest, selftest};
use overlay_updater::{
    CheckOutcome, GitHubSource, UpdateOutcome, UpdateState, UpdateStatus, VersionId, format_bytes,
};

use crate::cli::LaunchArgs;

pub fn run_launch(config: &LauncherConfig, args: LaunchArgs) -> Result<i32> {
    let launcher = open_launcher(config)?;
    launcher.copy_self_to_data_root();
    let source = GitHubSource::new(&config.updater).context("create release client")?;

    let code = launcher.run(&source, &args.app_args, args.detach, progress_observer())?;
    Ok(code)
}

pub fn run_check(config: &LauncherConfig) -> Result<i32> {
    let launcher = open_launcher(config)?;
    let source = GitHubSource::new(&config.updater).context("create release client")?;
    let mut updater = launcher.updater(source);

    match updater.check().context("check for updates")? {
        CheckOutcome::UpToDate { current, latest } => {
            println!(
                "Up to date: {} (latest on {} channel: {latest})",
                display_id(current.as_ref()),
                config.updater.channel
            );
        }
        CheckOutcome::Available { current, release } => {
            println!(
                "Update available: {} -> {}",
                display_id(current.as_ref()),
                release.version
            );
            if release.size > 0 {
                println!("Download: {} ({})", release.asset_name, format_bytes(release.size));
            }
            if let Some(url) = &release.html_url {
                println!("Release notes: {url}");
            }
        }
    }
    Ok(0)
}

pub fn run_update(config: &LauncherConfig, relaunch: bool) -> Result<i32> {
    let launcher = open_launcher(config)?;
    launcher.ensure_installed().context("resolve installed version")?;
    let source = GitHubSource::new(&config.updater).context("create release client")?;
    let mut updater = launcher.updater(source).on_state_change(progress_observer());
    let request_file = UpdateRequest::path(launcher.store().app_dir());

    let outcome = updater.update(|installed| {
        if relaunch {
            launch::spawn(installed, &[], &request_file)?;
        }
        Ok(())
    });

    match outcome {
        UpdateOutcome::UpToDate { current } => {
            println!("Already up to date ({})", display_id(current.as_ref()));
            Ok(0)
        }
        UpdateOutcome::Updated {
            previous,
            current,
            relaunch_error,
        } => {
            println!(
                "Updated {} -> {}",
                display_id(previous.as_ref()),
                current.id
            );
            match relaunch_error {
                Some(error) => Err(anyhow!("updated, but starting {} failed: {error}", current.id)),
                None => Ok(0),
            }
        }
        UpdateOutcome::Failed { reason, .. } => {
            eprintln!("{reason}");
            Ok(1)
        }
    }
}

pub fn run_versions(config: &LauncherConfig) -> Result<i32> {
    let launcher = open_launcher(config)?;
    let store = launcher.store();
    let current = store.current_id().context("read current pointer")?;
    let known_good = store.known_good_id().context("read known-good pointer")?;
    let installed = store.installed().context("list installed versions")?;

    if installed.is_empty() {
        println!("No versions installed in {}", store.versions_dir().display());
        return Ok(0);
    }

    let mut table = Table::new();
    table.set_header(vec!["Version", "State", "Executable", "Path"]);
    apply_table_style(&mut table);
    for version in installed {
        let is_current = current.as_ref() == Some(&version.id);
        let mut states = Vec::new();
        if is_current {
            states.push("current");
        }
        if known_good.as_ref() == Some(&version.id) {
            states.push("known-good");
        }
        let id_cell = if is_current {
            Cell::new(version.id.as_str())
                .fg(Color::Green)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(version.id.as_str())
        };
        let exe_cell = if version.is_runnable() {
            Cell::new("ok")
        } else {
            Cell::new("missing").fg(Color::Red)
        };
        table.add_row(vec![
            id_cell,
            Cell::new(states.join(", ")),
            exe_cell,
            Cell::new(version.path.display()),
        ]);
    }
    println!("{table}");
    Ok(0)
}

pub fn run_remove(config: &LauncherConfig, id: &str) -> Result<i32> {
    let launcher = open_launcher(config)?;
    let id = VersionId::new(id)?;
    launcher
        .store()
        .remove(&id)
        .with_context(|| format!("remove version {id}"))?;
    println!("Removed {id}");
    Ok(0)
}

pub fn run_prune(config: &LauncherConfig, keep: usize) -> Result<i32> {
    let launcher = open_launcher(config)?;
    let removed = launcher.store().prune(keep).context("prune versions")?;
    if removed.is_empty() {
        println!("Nothing to remove");
    }
    for id in removed {
        println!("Removed {id}");
    }
    Ok(0)
}

pub fn run_rollback(config: &LauncherConfig) -> Result<i32> {
    let launcher = open_launcher(config)?;
    let store = launcher.store();
    let Some(current) = store.current_id().context("read current pointer")? else {
        bail!("no version is current; nothing to roll back from");
    };

    let target = match store.known_good_id()? {
        Some(id) if id != current && store.contains(&id) => store.get(&id)?,
        _ => store
            .latest_installed(std::slice::from_ref(&current))?
            .ok_or_else(|| anyhow!("no other installed version to roll back to"))?,
    };
    if !target.is_runnable() {
        bail!("version {} has no executable", target.id);
    }

    store
        .set_current(&target.id)
        .with_context(|| format!("switch to {}", target.id))?;
    info!("Rolled back {} -> {}", current, target.id);
    println!("Rolled back {current} -> {}", target.id);
    Ok(0)
}

pub fn run_status(config: &LauncherConfig) -> Result<i32> {
    let launcher = open_launcher(config)?;
    let store = launcher.store();
    println!("Current: {}", display_id(store.current_id()?.as_ref()));
    println!("Known-good: {}", display_id(store.known_good_id()?.as_ref()));
    println!("Channel: {}", config.updater.channel);
    if UpdateRequest::is_pending(store.app_dir()) {
        println!("Update request: pending");
    }

    match UpdateStatus::read(store.app_dir()).context("read update status")? {
        None => println!("Last update: none recorded"),
        Some(status) => {
            let when = status.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
            if status.success {
                println!(
                    "Last update: {} -> {} at {when}",
                    display_id(status.previous_version.as_ref()),
                    display_id(status.version.as_ref())
                );
            } else {
                println!(
                    "Last update: failed at {when}: {}",
                    status.error.as_deref().unwrap_or("unknown error")
                );
                println!("Log: {}", status.log_file.display());
            }
        }
    }
    Ok(0)
}

pub fn run_self_test(config: &LauncherConfig) -> i32 {
    let report = selftest::run(config);
    for check in &report.checks {
        let mark = if check.passed { "ok" } else { "FAIL" };
        println!("[{mark:>4}] {}: {}", check.name, check.detail);
    }
    report.exit_code()
}

pub fn run_paths(config: &LauncherConfig) -> Result<i32> {
    let root = &config.data_root;
    println!("Data root: {}", root.path().display());
    println!("Versions: {}", root.app_dir().join("versions").display());
    println!("Outputs: {}", root.outputs_dir().display());
    println!("Log: {}", config.log_file().display());
    match &config.bundle_dir {
        Some(dir) => println!("Bundle: {}", dir.display()),
        None => println!("Bundle: unknown"),
    }
    println!("Releases: {}", config.updater.repo);
    Ok(0)
}

/// One-line error report naming the log file.
///
/// The packaged Windows launcher has no console, so this line may never be
/// seen; the same error is always recorded in the log first.
pub fn failure_line(error: &anyhow::Error, log_file: &Path) -> String {
    let message = format!("{error:#}");
    let log = log_file.display().to_string();
    if message.contains(&log) {
        format!("error: {message}")
    } else {
        format!("error: {message} (see {log} for details)")
    }
}

fn open_launcher(config: &LauncherConfig) -> Result<Launcher> {
    Launcher::new(config.clone())
        .with_context(|| format!("open data root {}", config.data_root.path().display()))
}

fn display_id(id: Option<&VersionId>) -> String {
    id.map_or_else(|| "none".to_string(), ToString::to_string)
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

/// Drives a download progress bar from orchestrator state changes. The bar
/// stays hidden until bytes arrive.
fn progress_observer() -> impl FnMut(&UpdateState) + Clone + Send + 'static {
    let bar = ProgressBar::hidden();
    if let Ok(style) = ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    ) {
        bar.set_style(style.progress_chars("=>-"));
    }

    move |state: &UpdateState| match state {
        UpdateState::Downloading {
            version,
            downloaded,
            total,
        } => {
            if bar.is_hidden() {
                bar.reset();
                bar.set_draw_target(ProgressDrawTarget::stderr());
                bar.set_message(format!("Downloading {version}"));
            }
            if *total > 0 {
                bar.set_length(*total);
            }
            bar.set_position(*downloaded);
        }
        UpdateState::Installing { version } => {
            bar.finish_and_clear();
            bar.set_draw_target(ProgressDrawTarget::hidden());
            info!("Installing {version}");
        }
        UpdateState::Failed { .. } => {
            bar.abandon();
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        UpdateState::Idle
        | UpdateState::Checking
        | UpdateState::SwitchingOver { .. }
        | UpdateState::Relaunching { .. } => {}
    }
}
