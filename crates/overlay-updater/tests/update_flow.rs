//! End-to-end update scenarios against an in-memory release source.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use overlay_updater::steps::verify::compute_sha256;
use overlay_updater::{
    CancelToken, CheckOutcome, DataRoot, Payload, ReleaseDescriptor, ReleaseSource,
    UpdateChannel, UpdateError, UpdateOutcome, UpdateState, UpdateStatus, Updater, UpdaterConfig,
    VersionId, VersionStore,
};

const EXE: &str = "GrapplingOverlay.exe";

fn id(s: &str) -> VersionId {
    VersionId::new(s).unwrap()
}

/// Builds a release ZIP with the bundle under `app/`.
fn release_zip(marker: &str) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file(format!("app/{EXE}"), options).unwrap();
    zip.write_all(marker.as_bytes()).unwrap();
    zip.start_file("app/models/pose.onnx", options).unwrap();
    zip.write_all(&[7u8; 2048]).unwrap();
    zip.finish().unwrap().into_inner()
}

fn descriptor(version: &str, archive: &[u8]) -> ReleaseDescriptor {
    ReleaseDescriptor {
        version: id(version),
        tag: format!("v{version}"),
        asset_name: "GrapplingOverlay-Windows.zip".to_string(),
        download_url: format!("https://example.invalid/v{version}/GrapplingOverlay-Windows.zip"),
        size: archive.len() as u64,
        sha256: Some(compute_sha256(archive)),
        prerelease: false,
        notes: String::new(),
        html_url: None,
    }
}

/// How the fake source delivers the archive bytes.
#[derive(Clone, Copy)]
enum Delivery {
    Complete,
    /// Fail with a connection reset after this many bytes.
    CutAt(usize),
    /// Cancel the given token after the first chunk.
    CancelAfterFirstChunk,
}

struct FakeSource {
    release: Option<ReleaseDescriptor>,
    archive: Vec<u8>,
    delivery: Delivery,
    cancel: CancelToken,
}

impl FakeSource {
    fn new(version: &str) -> Self {
        let archive = release_zip(version);
        Self {
            release: Some(descriptor(version, &archive)),
            archive,
            delivery: Delivery::Complete,
            cancel: CancelToken::new(),
        }
    }

    fn empty() -> Self {
        Self {
            release: None,
            archive: Vec::new(),
            delivery: Delivery::Complete,
            cancel: CancelToken::new(),
        }
    }

    fn delivering(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

struct CutReader {
    data: Cursor<Vec<u8>>,
}

impl Read for CutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
            n => Ok(n),
        }
    }
}

struct CancellingReader {
    data: Cursor<Vec<u8>>,
    cancel: CancelToken,
}

impl Read for CancellingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(16);
        let n = self.data.read(&mut buf[..limit])?;
        self.cancel.cancel();
        Ok(n)
    }
}

impl ReleaseSource for FakeSource {
    fn get_latest(&self) -> overlay_updater::Result<ReleaseDescriptor> {
        self.release
            .clone()
            .ok_or_else(|| UpdateError::NotFound("no releases".to_string()))
    }

    fn open(&self, _release: &ReleaseDescriptor) -> overlay_updater::Result<Box<dyn Read + Send>> {
        Ok(match self.delivery {
            Delivery::Complete => Box::new(Cursor::new(self.archive.clone())),
            Delivery::CutAt(n) => Box::new(CutReader {
                data: Cursor::new(self.archive[..n].to_vec()),
            }),
            Delivery::CancelAfterFirstChunk => Box::new(CancellingReader {
                data: Cursor::new(self.archive.clone()),
                cancel: self.cancel.clone(),
            }),
        })
    }
}

struct Harness {
    _temp: tempfile::TempDir,
    root: DataRoot,
    store: VersionStore,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = DataRoot::new(temp.path().join("GrapplingOverlay"));
        root.ensure().unwrap();
        let store = VersionStore::open(root.app_dir(), EXE).unwrap();
        Self {
            _temp: temp,
            root,
            store,
        }
    }

    /// Installs a version from an unpacked bundle and optionally selects it.
    fn with_installed(self, version: &str, current: bool) -> Self {
        let src = self.root.path().join(format!("src-{version}"));
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(EXE), version.as_bytes()).unwrap();
        self.store
            .install(&id(version), &Payload::Directory(src.clone()))
            .unwrap();
        fs::remove_dir_all(&src).unwrap();
        if current {
            self.store.set_current(&id(version)).unwrap();
        }
        self
    }

    fn updater(&self, source: FakeSource) -> Updater<FakeSource> {
        let cancel = source.cancel.clone();
        Updater::new(
            source,
            self.store.clone(),
            &UpdaterConfig::default(),
            self.root.launcher_log(),
        )
        .with_cancel_token(cancel)
    }

    fn leftovers(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.root.app_dir()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if name.starts_with(".staging-") || name.starts_with(".removing-") {
                found.push(PathBuf::from(name));
            }
        }
        let downloads = self.root.app_dir().join("downloads");
        if downloads.is_dir() {
            found.extend(fs::read_dir(downloads).unwrap().map(|e| e.unwrap().path()));
        }
        found
    }
}

fn assert_unchanged(h: &Harness, current: &str, versions: &[&str]) {
    assert_eq!(h.store.current_id().unwrap(), Some(id(current)));
    let listed: Vec<_> = h.store.list_versions().unwrap().into_iter().collect();
    let expected: Vec<_> = versions.iter().map(|v| id(v)).collect();
    assert_eq!(listed, expected);
    assert!(h.store.get_current().unwrap().is_runnable());
    assert!(h.leftovers().is_empty(), "leftovers: {:?}", h.leftovers());
}

#[test]
fn test_fresh_machine_installs_first_release() {
    let h = Harness::new();
    let mut updater = h.updater(FakeSource::new("1.0.0"));

    let outcome = updater.update(|_| Ok(()));

    match outcome {
        UpdateOutcome::Updated {
            previous, current, ..
        } => {
            assert_eq!(previous, None);
            assert_eq!(current.id, id("1.0.0"));
            assert_eq!(fs::read(&current.executable).unwrap(), b"1.0.0");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_unchanged(&h, "1.0.0", &["1.0.0"]);
}

#[test]
fn test_update_from_1_2_0_to_1_3_0() {
    let h = Harness::new().with_installed("1.2.0", true);
    let states = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let relaunched = Arc::new(Mutex::new(None));

    let mut updater = {
        let states = Arc::clone(&states);
        h.updater(FakeSource::new("1.3.0")).on_state_change(move |state| {
            let mut states = states.lock().unwrap();
            if states.last() != Some(&state.name()) {
                states.push(state.name());
            }
        })
    };

    let outcome = {
        let relaunched = Arc::clone(&relaunched);
        updater.update(move |installed| {
            *relaunched.lock().unwrap() = Some(installed.id.clone());
            Ok(())
        })
    };

    assert!(matches!(
        outcome,
        UpdateOutcome::Updated { ref previous, relaunch_error: None, .. } if *previous == Some(id("1.2.0"))
    ));
    assert_eq!(*relaunched.lock().unwrap(), Some(id("1.3.0")));
    assert_unchanged(&h, "1.3.0", &["1.2.0", "1.3.0"]);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            "Checking",
            "Downloading",
            "Installing",
            "SwitchingOver",
            "Relaunching",
            "Idle"
        ]
    );
    assert_eq!(updater.state(), &UpdateState::Idle);

    let status = UpdateStatus::read(h.store.app_dir()).unwrap().unwrap();
    assert!(status.success);
    assert_eq!(status.version, Some(id("1.3.0")));
    assert_eq!(status.previous_version, Some(id("1.2.0")));
}

#[test]
fn test_download_interrupted_at_half_keeps_previous_version() {
    let h = Harness::new().with_installed("1.2.0", true);
    let source = FakeSource::new("1.3.0");
    let half = source.archive.len() / 2;
    let mut updater = h.updater(source.delivering(Delivery::CutAt(half)));

    let outcome = updater.update(|_| panic!("must not relaunch after a failed download"));

    match outcome {
        UpdateOutcome::Failed { reason, error } => {
            assert!(matches!(error, UpdateError::Network(_)), "{error:?}");
            assert!(reason.contains("launcher.log"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_unchanged(&h, "1.2.0", &["1.2.0"]);

    let status = UpdateStatus::read(h.store.app_dir()).unwrap().unwrap();
    assert!(!status.success);
    assert_eq!(status.version, Some(id("1.3.0")));
}

#[test]
fn test_integrity_failure_keeps_previous_version() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut source = FakeSource::new("1.3.0");
    if let Some(release) = source.release.as_mut() {
        release.sha256 = Some("0".repeat(64));
    }
    let mut updater = h.updater(source);

    let outcome = updater.update(|_| Ok(()));

    assert!(matches!(
        outcome,
        UpdateOutcome::Failed {
            error: UpdateError::Integrity { .. },
            ..
        }
    ));
    assert_unchanged(&h, "1.2.0", &["1.2.0"]);
}

#[test]
fn test_corrupt_archive_is_install_error() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut source = FakeSource::new("1.3.0");
    source.archive = b"PK\x03\x04 definitely not a zip".to_vec();
    source.release = Some(descriptor("1.3.0", &source.archive));
    let mut updater = h.updater(source);

    let outcome = updater.update(|_| Ok(()));

    assert!(matches!(
        outcome,
        UpdateOutcome::Failed {
            error: UpdateError::Install(_),
            ..
        }
    ));
    assert_unchanged(&h, "1.2.0", &["1.2.0"]);
}

#[test]
fn test_check_is_idempotent_and_read_only() {
    let h = Harness::new().with_installed("1.3.0", true);
    let mut updater = h.updater(FakeSource::new("1.3.0"));

    for _ in 0..2 {
        let outcome = updater.check().unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::UpToDate {
                current: Some(id("1.3.0")),
                latest: id("1.3.0"),
            }
        );
    }
    assert!(matches!(
        updater.update(|_| Ok(())),
        UpdateOutcome::UpToDate { .. }
    ));
    assert_unchanged(&h, "1.3.0", &["1.3.0"]);
    assert!(UpdateStatus::read(h.store.app_dir()).unwrap().is_none());
}

#[test]
fn test_check_reports_available_without_installing() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut updater = h.updater(FakeSource::new("1.3.0"));

    match updater.check().unwrap() {
        CheckOutcome::Available { current, release } => {
            assert_eq!(current, Some(id("1.2.0")));
            assert_eq!(release.version, id("1.3.0"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_unchanged(&h, "1.2.0", &["1.2.0"]);
}

#[test]
fn test_older_release_is_not_a_downgrade() {
    let h = Harness::new().with_installed("2.0.0", true);
    let mut updater = h.updater(FakeSource::new("1.9.0"));

    assert!(matches!(
        updater.update(|_| Ok(())),
        UpdateOutcome::UpToDate { .. }
    ));
    assert_unchanged(&h, "2.0.0", &["2.0.0"]);
}

#[test]
fn test_opaque_identifier_is_accepted_as_update() {
    let h = Harness::new().with_installed("0", true);
    let mut updater = h.updater(FakeSource::new("nightly-20240501"));

    let outcome = updater.update(|_| Ok(()));
    assert!(matches!(outcome, UpdateOutcome::Updated { .. }));
    assert_eq!(h.store.current_id().unwrap(), Some(id("nightly-20240501")));
}

#[test]
fn test_stable_channel_ignores_prerelease() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut source = FakeSource::new("1.3.0-beta.1");
    if let Some(release) = source.release.as_mut() {
        release.prerelease = true;
    }
    let mut updater = h.updater(source);
    assert!(matches!(updater.check().unwrap(), CheckOutcome::UpToDate { .. }));

    let mut beta = UpdaterConfig::default();
    beta.channel = UpdateChannel::Beta;
    let mut source = FakeSource::new("1.3.0-beta.1");
    if let Some(release) = source.release.as_mut() {
        release.prerelease = true;
    }
    let mut updater = Updater::new(source, h.store.clone(), &beta, h.root.launcher_log());
    assert!(matches!(updater.check().unwrap(), CheckOutcome::Available { .. }));
}

#[test]
fn test_no_release_is_not_found() {
    let h = Harness::new().with_installed("0", true);
    let mut updater = h.updater(FakeSource::empty());

    assert!(matches!(updater.check(), Err(UpdateError::NotFound(_))));
    assert_eq!(updater.state(), &UpdateState::Idle);
    assert!(matches!(
        updater.update(|_| Ok(())),
        UpdateOutcome::Failed {
            error: UpdateError::NotFound(_),
            ..
        }
    ));
    assert_unchanged(&h, "0", &["0"]);
}

#[test]
fn test_cancel_before_start() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut updater = h.updater(FakeSource::new("1.3.0"));
    updater.cancel_token().cancel();

    assert!(matches!(
        updater.update(|_| Ok(())),
        UpdateOutcome::Failed {
            error: UpdateError::Cancelled,
            ..
        }
    ));
    assert_unchanged(&h, "1.2.0", &["1.2.0"]);
}

#[test]
fn test_cancel_during_download() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut updater = h.updater(FakeSource::new("1.3.0").delivering(Delivery::CancelAfterFirstChunk));

    let outcome = updater.update(|_| Ok(()));

    match outcome {
        UpdateOutcome::Failed { reason, error } => {
            assert!(matches!(error, UpdateError::Cancelled));
            assert!(reason.contains("cancelled"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_unchanged(&h, "1.2.0", &["1.2.0"]);
}

#[test]
fn test_cancel_during_install_is_deferred_until_switch_over() {
    let h = Harness::new().with_installed("1.2.0", true);
    let updater = h.updater(FakeSource::new("1.3.0"));
    let token = updater.cancel_token();
    let mut updater = updater.on_state_change(move |state| {
        if matches!(state, UpdateState::Installing { .. }) {
            token.cancel();
        }
    });
    let mut relaunched = false;

    let outcome = updater.update(|_| {
        relaunched = true;
        Ok(())
    });

    assert!(matches!(
        outcome,
        UpdateOutcome::Failed {
            error: UpdateError::Cancelled,
            ..
        }
    ));
    assert!(!relaunched);
    // The install ran to completion but was never selected.
    assert_unchanged(&h, "1.2.0", &["1.2.0", "1.3.0"]);
    assert!(h.store.get(&id("1.3.0")).unwrap().is_runnable());
    let status = UpdateStatus::read(h.store.app_dir()).unwrap().unwrap();
    assert!(!status.success);
    assert_eq!(status.version, Some(id("1.3.0")));
}

#[test]
fn test_relaunch_failure_keeps_new_version() {
    let h = Harness::new().with_installed("1.2.0", true);
    let mut updater = h.updater(FakeSource::new("1.3.0"));

    let outcome =
        updater.update(|_| Err(UpdateError::Startup("spawn failed".to_string())));

    match outcome {
        UpdateOutcome::Updated { relaunch_error, .. } => {
            assert!(relaunch_error.unwrap().contains("spawn failed"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.store.current_id().unwrap(), Some(id("1.3.0")));
}

#[test]
fn test_retention_runs_after_switch_over() {
    let h = Harness::new()
        .with_installed("0", false)
        .with_installed("1.0.0", false)
        .with_installed("1.1.0", false)
        .with_installed("1.2.0", true);
    h.store.set_known_good(&id("1.0.0")).unwrap();
    let mut updater = h.updater(FakeSource::new("1.3.0"));

    assert!(matches!(
        updater.update(|_| Ok(())),
        UpdateOutcome::Updated { .. }
    ));

    let left: Vec<_> = h.store.list_versions().unwrap().into_iter().collect();
    assert_eq!(left, vec![id("1.0.0"), id("1.2.0"), id("1.3.0")]);
}

fn versions_in(path: &Path) -> usize {
    fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_interrupted_download_never_changes_pointer(fraction in 0.0f64..1.0) {
        let h = Harness::new().with_installed("1.2.0", true);
        let source = FakeSource::new("1.3.0");
        let cut = ((source.archive.len() as f64) * fraction) as usize;
        let mut updater = h.updater(source.delivering(Delivery::CutAt(cut)));

        let outcome = updater.update(|_| Ok(()));

        let failed = matches!(outcome, UpdateOutcome::Failed { .. });
        prop_assert!(failed);
        prop_assert_eq!(h.store.current_id().unwrap(), Some(id("1.2.0")));
        prop_assert_eq!(versions_in(&h.store.versions_dir()), 1);
        prop_assert!(h.leftovers().is_empty());
    }
}
