//! Launcher scenarios with shell-script stand-ins for the application.
#![cfg(unix)]

use std::ffi::OsString;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use overlay_launcher::{Launcher, LauncherConfig, UpdateRequest};
use overlay_updater::steps::verify::compute_sha256;
use overlay_updater::{
    DataRoot, Payload, ReleaseDescriptor, ReleaseSource, UpdateError, UpdateState, UpdateStatus,
    VersionId,
};

const EXE: &str = "GrapplingOverlay";

fn id(s: &str) -> VersionId {
    VersionId::new(s).unwrap()
}

/// Script that records its version and arguments to `runs.log`, then runs
/// `tail` (shell code deciding the exit).
fn app_script(runs: &Path, tail: &str) -> String {
    format!(
        "#!/bin/sh\necho \"$GRAPPLING_OVERLAY_VERSION $*\" >> {}\n{tail}\n",
        runs.display()
    )
}

fn write_executable(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

struct FakeSource {
    release: Option<ReleaseDescriptor>,
    archive: Vec<u8>,
}

impl FakeSource {
    fn new(version: &str, script: &str) -> Self {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        zip.start_file(format!("app/{EXE}"), options).unwrap();
        zip.write_all(script.as_bytes()).unwrap();
        let archive = zip.finish().unwrap().into_inner();

        let release = ReleaseDescriptor {
            version: id(version),
            tag: format!("v{version}"),
            asset_name: "GrapplingOverlay-Linux.zip".to_string(),
            download_url: format!("https://example.invalid/{version}.zip"),
            size: archive.len() as u64,
            sha256: Some(compute_sha256(&archive)),
            prerelease: false,
            notes: String::new(),
            html_url: None,
        };
        Self {
            release: Some(release),
            archive,
        }
    }

    fn empty() -> Self {
        Self {
            release: None,
            archive: Vec::new(),
        }
    }
}

impl ReleaseSource for FakeSource {
    fn get_latest(&self) -> overlay_updater::Result<ReleaseDescriptor> {
        self.release
            .clone()
            .ok_or_else(|| UpdateError::NotFound("no releases".to_string()))
    }

    fn open(&self, _release: &ReleaseDescriptor) -> overlay_updater::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.archive.clone())))
    }
}

struct Harness {
    temp: tempfile::TempDir,
    launcher: Launcher,
}

impl Harness {
    /// A launcher whose bundled application runs `bundle_tail`.
    fn new(bundle_tail: &str) -> Self {
        Self::with_grace(bundle_tail, Duration::from_millis(100))
    }

    fn with_grace(bundle_tail: &str, grace: Duration) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let bundle = temp.path().join("download/app");
        write_executable(&bundle.join(EXE), &app_script(&temp.path().join("runs.log"), bundle_tail));

        let mut config =
            LauncherConfig::for_root(DataRoot::new(temp.path().join("data")), Some(bundle))
                .unwrap();
        config.executable_name = EXE.to_string();
        config.startup_grace = grace;
        let launcher = Launcher::new(config).unwrap();
        Self { temp, launcher }
    }

    fn runs_log(&self) -> PathBuf {
        self.temp.path().join("runs.log")
    }

    fn runs(&self) -> Vec<String> {
        fs::read_to_string(self.runs_log())
            .unwrap_or_default()
            .lines()
            .map(|l| l.trim().to_string())
            .collect()
    }

    fn run(&self, source: &FakeSource, args: &[&str]) -> i32 {
        let args: Vec<OsString> = args.iter().map(OsString::from).collect();
        self.launcher
            .run(source, &args, false, |_: &UpdateState| {})
            .unwrap()
    }

    fn app_dir(&self) -> PathBuf {
        self.launcher.store().app_dir().to_path_buf()
    }
}

#[test]
fn test_fresh_machine_runs_bundled_version() {
    let h = Harness::new("exit 0");

    let code = h.run(&FakeSource::empty(), &["--headless"]);

    assert_eq!(code, 0);
    assert_eq!(h.runs(), vec!["0 --headless"]);
    let store = h.launcher.store();
    assert_eq!(store.current_id().unwrap(), Some(id("0")));
    assert_eq!(store.known_good_id().unwrap(), Some(id("0")));
}

#[test]
fn test_exit_code_request_updates_and_restarts() {
    let h = Harness::new("exit 75");
    let source = FakeSource::new("1.3.0", &app_script(&h.runs_log(), "exit 0"));

    let code = h.run(&source, &["--test"]);

    assert_eq!(code, 0);
    assert_eq!(h.runs(), vec!["0 --test", "1.3.0 --test"]);
    let store = h.launcher.store();
    assert_eq!(store.current_id().unwrap(), Some(id("1.3.0")));
    assert_eq!(store.known_good_id().unwrap(), Some(id("1.3.0")));

    let status = UpdateStatus::read(&h.app_dir()).unwrap().unwrap();
    assert!(status.success);
    assert_eq!(status.version, Some(id("1.3.0")));
    assert_eq!(status.previous_version, Some(id("0")));
}

#[test]
fn test_request_file_triggers_update() {
    let h = Harness::new("touch \"$GRAPPLING_OVERLAY_UPDATE_REQUEST\"\nexit 0");
    let source = FakeSource::new("1.3.0", &app_script(&h.runs_log(), "sleep 1\nexit 4"));

    let code = h.run(&source, &[]);

    assert_eq!(code, 4);
    assert_eq!(h.runs(), vec!["0", "1.3.0"]);
    assert!(!UpdateRequest::is_pending(&h.app_dir()));
    assert_eq!(h.launcher.store().current_id().unwrap(), Some(id("1.3.0")));
}

#[test]
fn test_failed_update_restarts_previous_version() {
    // Ask for an update on the first run only.
    let h = Harness::new(
        "if [ ! -f \"$0.asked\" ]; then touch \"$0.asked\"; exit 75; fi\nexit 0",
    );

    let code = h.run(&FakeSource::empty(), &[]);

    assert_eq!(code, 0);
    assert_eq!(h.runs(), vec!["0", "0"]);
    assert_eq!(h.launcher.store().current_id().unwrap(), Some(id("0")));
    let status = UpdateStatus::read(&h.app_dir()).unwrap().unwrap();
    assert!(!status.success);
    assert!(status.error.is_some());
    assert!(status.log_file.ends_with("logs/launcher.log"));
}

#[test]
fn test_updated_version_crashing_on_start_falls_back() {
    let h = Harness::with_grace(
        "if [ ! -f \"$0.asked\" ]; then touch \"$0.asked\"; exit 75; fi\nexit 0",
        Duration::from_secs(2),
    );
    let source = FakeSource::new("1.3.0", &app_script(&h.runs_log(), "exit 1"));

    let code = h.run(&source, &[]);

    assert_eq!(code, 0);
    assert_eq!(h.runs(), vec!["0", "1.3.0", "0"]);
    let store = h.launcher.store();
    assert_eq!(store.current_id().unwrap(), Some(id("0")));
    assert_eq!(store.known_good_id().unwrap(), Some(id("0")));
    assert!(store.contains(&id("1.3.0")));
}

#[test]
fn test_startup_failure_without_alternative_reports_exit_code() {
    let h = Harness::with_grace("exit 3", Duration::from_secs(2));

    let code = h.run(&FakeSource::empty(), &[]);

    assert_eq!(code, 3);
    assert_eq!(h.runs(), vec!["0"]);
    assert_eq!(h.launcher.store().current_id().unwrap(), Some(id("0")));
}

#[test]
fn test_no_update_after_failed_start_in_same_run() {
    // The bundle always asks for an update; the release never starts.
    let h = Harness::with_grace("exit 75", Duration::from_secs(2));
    let source = FakeSource::new("1.3.0", &app_script(&h.runs_log(), "exit 1"));

    let code = h.run(&source, &[]);

    assert_eq!(code, 0);
    assert_eq!(h.runs(), vec!["0", "1.3.0", "0"]);
    assert_eq!(h.launcher.store().current_id().unwrap(), Some(id("0")));
}

#[test]
fn test_leftover_request_is_served_before_start() {
    let h = Harness::new("exit 0");
    h.launcher.ensure_installed().unwrap();
    UpdateRequest::new(Some(id("0"))).write(&h.app_dir()).unwrap();
    let source = FakeSource::new("1.3.0", &app_script(&h.runs_log(), "exit 0"));

    let code = h.run(&source, &[]);

    assert_eq!(code, 0);
    assert_eq!(h.runs(), vec!["1.3.0"]);
}

#[test]
fn test_missing_executable_falls_back_to_known_good() {
    let h = Harness::new("exit 0");
    let store = h.launcher.store();
    h.launcher.ensure_installed().unwrap();
    store.set_known_good(&id("0")).unwrap();

    let broken = h.temp.path().join("broken");
    write_executable(&broken.join(EXE), "#!/bin/sh\nexit 0\n");
    store.install(&id("1.3.0"), &Payload::Directory(broken)).unwrap();
    store.set_current(&id("1.3.0")).unwrap();
    fs::remove_file(store.get(&id("1.3.0")).unwrap().executable).unwrap();

    let resolved = h.launcher.resolve_startup().unwrap();

    assert_eq!(resolved.id, id("0"));
    assert_eq!(store.current_id().unwrap(), Some(id("0")));
}

#[test]
fn test_fallback_without_known_good_uses_latest_other() {
    let h = Harness::new("exit 0");
    let store = h.launcher.store();
    h.launcher.ensure_installed().unwrap();
    for version in ["1.2.0", "1.3.0"] {
        let dir = h.temp.path().join(version);
        write_executable(&dir.join(EXE), "#!/bin/sh\nexit 0\n");
        store.install(&id(version), &Payload::Directory(dir)).unwrap();
    }
    store.set_current(&id("1.3.0")).unwrap();
    fs::remove_file(store.get(&id("1.3.0")).unwrap().executable).unwrap();

    let resolved = h.launcher.resolve_startup().unwrap();

    assert_eq!(resolved.id, id("1.2.0"));
}

#[test]
fn test_no_runnable_version_is_startup_error() {
    let h = Harness::new("exit 0");
    let installed = h.launcher.ensure_installed().unwrap();
    fs::remove_file(&installed.executable).unwrap();

    let err = h.launcher.resolve_startup().unwrap_err();

    match err {
        UpdateError::Startup(message) => assert!(message.contains("launcher.log"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_detach_returns_immediately() {
    let h = Harness::new("sleep 2");
    let args: Vec<OsString> = Vec::new();

    let code = h
        .launcher
        .run(&FakeSource::empty(), &args, true, |_: &UpdateState| {})
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.launcher.store().known_good_id().unwrap(), None);
}
