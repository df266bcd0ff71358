//! Installed versions and the current-version pointer.
//!
//! Everything lives under the data root's `app/` directory:
//!
//! ```text
//! app/
//!   versions/<id>/     one immutable extracted bundle per version
//!   current            pointer file holding the active id
//!   known_good         last id whose executable started successfully
//!   downloads/         in-flight archive downloads
//!   .staging-*         in-flight installs (never listed)
//!   .removing-*        versions being deleted
//! ```
//!
//! Pointer files are only ever replaced by writing a temp file in `app/`,
//! syncing it and renaming it over the old one, so a reader sees either the
//! previous id or the new one.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{Result, UpdateError};
use crate::steps::extract::{copy_tree, extract_archive};
use crate::version::{VersionId, precedence};

/// Directory holding one subdirectory per installed version.
pub const VERSIONS_DIR: &str = "versions";

/// Current-version pointer file.
pub const POINTER_FILE: &str = "current";

/// Known-good pointer file.
pub const KNOWN_GOOD_FILE: &str = "known_good";

/// Pointer file of the previous launcher generation (absolute bundle path).
const LEGACY_POINTER_FILE: &str = "current.txt";

/// Directory under `app/` holding in-flight downloads.
pub const DOWNLOADS_DIR: &str = "downloads";

const STAGING_PREFIX: &str = ".staging-";
const REMOVING_PREFIX: &str = ".removing-";

/// Leftovers in `app/` are only swept once they are this old, so opening
/// the store for a status query keeps a running update's files.
const LEFTOVER_MIN_AGE: Duration = Duration::from_secs(15 * 60);

/// Subdirectories a packaged archive may wrap the bundle in.
const BUNDLE_WRAPPERS: [&str; 2] = ["app", "GrapplingOverlay"];

/// Executable name of the main application on this platform.
#[must_use]
pub const fn default_executable_name() -> &'static str {
    if cfg!(windows) {
        "GrapplingOverlay.exe"
    } else {
        "GrapplingOverlay"
    }
}

/// What to install a version from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A ZIP or tar.gz archive; the format is detected.
    Archive(PathBuf),
    /// An already unpacked bundle directory, copied as-is.
    Directory(PathBuf),
}

/// One installed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    /// Version identifier.
    pub id: VersionId,
    /// `app/versions/<id>/`.
    pub path: PathBuf,
    /// The application executable inside the bundle.
    pub executable: PathBuf,
}

impl InstalledVersion {
    /// Whether the executable is present.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.executable.is_file()
    }
}

/// Owner of `app/`: installed versions and the pointers into them.
#[derive(Debug, Clone)]
pub struct VersionStore {
    app_dir: PathBuf,
    executable_name: String,
}

impl VersionStore {
    /// Opens the store rooted at `app_dir`, creating it if needed.
    ///
    /// Layouts left by older launchers are cleaned up, as are staging,
    /// removal and download leftovers of a process that was killed midway.
    pub fn open(app_dir: impl Into<PathBuf>, executable_name: impl Into<String>) -> Result<Self> {
        let store = Self {
            app_dir: app_dir.into(),
            executable_name: executable_name.into(),
        };
        fs::create_dir_all(store.versions_dir())?;
        store.cleanup_legacy();
        store.sweep_interrupted(LEFTOVER_MIN_AGE);
        Ok(store)
    }

    /// The `app/` directory.
    #[must_use]
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// `app/versions/`.
    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        self.app_dir.join(VERSIONS_DIR)
    }

    /// Name of the application executable.
    #[must_use]
    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    fn version_path(&self, id: &VersionId) -> PathBuf {
        self.versions_dir().join(id.as_str())
    }

    /// Lists installed version ids.
    pub fn list_versions(&self) -> Result<BTreeSet<VersionId>> {
        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(self.versions_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match VersionId::new(name.to_string_lossy()) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => tracing::trace!("Skipping {:?} in versions directory", name),
            }
        }
        Ok(ids)
    }

    /// Whether `id` is installed.
    #[must_use]
    pub fn contains(&self, id: &VersionId) -> bool {
        self.version_path(id).is_dir()
    }

    /// Looks up one installed version.
    pub fn get(&self, id: &VersionId) -> Result<InstalledVersion> {
        let path = self.version_path(id);
        if !path.is_dir() {
            return Err(UpdateError::NotFound(format!("version {id} is not installed")));
        }
        let executable = self.executable_in(&path);
        Ok(InstalledVersion {
            id: id.clone(),
            path,
            executable,
        })
    }

    /// Installed versions, newest first.
    pub fn installed(&self) -> Result<Vec<InstalledVersion>> {
        let mut ids: Vec<_> = self.list_versions()?.into_iter().collect();
        ids.sort_by(|a, b| precedence(b, a));
        ids.iter().map(|id| self.get(id)).collect()
    }

    /// Resolves the executable of a version directory. Bundles installed by
    /// older launchers keep it under `app/` or `GrapplingOverlay/`.
    fn executable_in(&self, version_dir: &Path) -> PathBuf {
        let direct = version_dir.join(&self.executable_name);
        if direct.is_file() {
            return direct;
        }
        BUNDLE_WRAPPERS
            .iter()
            .map(|wrapper| version_dir.join(wrapper).join(&self.executable_name))
            .find(|candidate| candidate.is_file())
            .unwrap_or(direct)
    }

    /// Finds the directory inside an unpacked payload (or a bundle shipped
    /// next to the launcher) that holds the executable.
    #[must_use]
    pub fn locate_bundle_root(&self, unpacked: &Path) -> Option<PathBuf> {
        BUNDLE_WRAPPERS
            .iter()
            .map(|wrapper| unpacked.join(wrapper))
            .chain(std::iter::once(unpacked.to_path_buf()))
            .find(|dir| dir.join(&self.executable_name).is_file())
    }

    /// Installs `payload` as version `id`.
    ///
    /// The payload is unpacked into a staging directory under `app/` and
    /// renamed into `versions/<id>` only once it is complete. Installing an
    /// id that already exists succeeds when the content is identical and
    /// fails with [`UpdateError::Install`] otherwise.
    pub fn install(&self, id: &VersionId, payload: &Payload) -> Result<InstalledVersion> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.app_dir)
            .map_err(|e| UpdateError::Install(format!("Failed to create staging directory: {e}")))?;
        let unpacked = staging.path().join("payload");
        fs::create_dir(&unpacked)?;

        match payload {
            Payload::Archive(archive) => extract_archive(archive, &unpacked)?,
            Payload::Directory(dir) => copy_tree(dir, &unpacked)?,
        };

        let root = self.locate_bundle_root(&unpacked).ok_or_else(|| {
            UpdateError::Install(format!(
                "bundle for version {id} does not contain {}",
                self.executable_name
            ))
        })?;

        let target = self.version_path(id);
        if target.exists() {
            if tree_digest(&root)? == tree_digest(&target)? {
                tracing::info!("Version {} already installed with identical content", id);
                return self.get(id);
            }
            return Err(UpdateError::Install(format!(
                "version {id} is already installed with different content"
            )));
        }

        fs::rename(&root, &target).map_err(|e| {
            UpdateError::Install(format!(
                "Failed to move {} into {}: {e}",
                root.display(),
                target.display()
            ))
        })?;
        tracing::info!("Installed version {} into {}", id, target.display());

        // `staging` is dropped here, removing whatever the rename left behind.
        self.get(id)
    }

    /// The id the current pointer names, or `None` on a fresh machine.
    ///
    /// An unreadable or malformed pointer is logged and reported as `None`.
    pub fn current_id(&self) -> Result<Option<VersionId>> {
        self.read_pointer(POINTER_FILE)
    }

    /// The version the current pointer names.
    pub fn get_current(&self) -> Result<InstalledVersion> {
        match self.current_id()? {
            Some(id) => self.get(&id),
            None => Err(UpdateError::NotFound("no current version is set".to_string())),
        }
    }

    /// Atomically points `current` at an installed version.
    pub fn set_current(&self, id: &VersionId) -> Result<()> {
        if !self.contains(id) {
            return Err(UpdateError::NotFound(format!(
                "cannot select version {id}: it is not installed"
            )));
        }
        self.write_pointer(POINTER_FILE, id)?;
        tracing::info!("Current version is now {}", id);
        Ok(())
    }

    /// The last version recorded as starting successfully.
    pub fn known_good_id(&self) -> Result<Option<VersionId>> {
        self.read_pointer(KNOWN_GOOD_FILE)
    }

    /// Records `id` as known to start.
    pub fn set_known_good(&self, id: &VersionId) -> Result<()> {
        if !self.contains(id) {
            return Err(UpdateError::NotFound(format!("version {id} is not installed")));
        }
        self.write_pointer(KNOWN_GOOD_FILE, id)
    }

    /// Deletes an installed version. The current version cannot be removed.
    pub fn remove(&self, id: &VersionId) -> Result<()> {
        if self.current_id()?.as_ref() == Some(id) {
            return Err(UpdateError::InUse(id.clone()));
        }
        let path = self.version_path(id);
        if !path.is_dir() {
            return Err(UpdateError::NotFound(format!("version {id} is not installed")));
        }

        // Move out of versions/ first so a partial delete is never listed.
        let trash = self
            .app_dir
            .join(format!("{REMOVING_PREFIX}{id}-{}", std::process::id()));
        fs::rename(&path, &trash)?;
        if self.known_good_id()?.as_ref() == Some(id) {
            let pointer = self.app_dir.join(KNOWN_GOOD_FILE);
            if let Err(e) = fs::remove_file(&pointer) {
                tracing::warn!("Failed to clear {}: {}", pointer.display(), e);
            }
        }
        if let Err(e) = fs::remove_dir_all(&trash) {
            tracing::warn!("Failed to delete {}: {}", trash.display(), e);
        }

        tracing::info!("Removed version {}", id);
        Ok(())
    }

    /// Applies the retention policy.
    ///
    /// Keeps the current version, the known-good version and the `keep`
    /// highest-ordered others. Returns the removed ids.
    pub fn prune(&self, keep: usize) -> Result<Vec<VersionId>> {
        let current = self.current_id()?;
        let known_good = self.known_good_id()?;

        let mut candidates: Vec<_> = self
            .list_versions()?
            .into_iter()
            .filter(|id| Some(id) != current.as_ref() && Some(id) != known_good.as_ref())
            .collect();
        candidates.sort_by(|a, b| precedence(b, a));

        let mut removed = Vec::new();
        for id in candidates.into_iter().skip(keep) {
            self.remove(&id)?;
            removed.push(id);
        }
        Ok(removed)
    }

    /// Highest-ordered runnable version not in `excluding`.
    pub fn latest_installed(&self, excluding: &[VersionId]) -> Result<Option<InstalledVersion>> {
        Ok(self
            .installed()?
            .into_iter()
            .filter(|v| !excluding.contains(&v.id))
            .find(InstalledVersion::is_runnable))
    }

    fn read_pointer(&self, name: &str) -> Result<Option<VersionId>> {
        let path = self.app_dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            // A legacy `current` directory that could not be cleaned up.
            Err(_) if path.is_dir() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match VersionId::new(content.trim()) {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                tracing::warn!("Ignoring malformed pointer {}: {:?}", path.display(), content);
                Ok(None)
            }
        }
    }

    fn write_pointer(&self, name: &str, id: &VersionId) -> Result<()> {
        let mut temp = NamedTempFile::new_in(&self.app_dir)?;
        writeln!(temp, "{id}")?;
        temp.as_file().sync_all()?;
        temp.persist(self.app_dir.join(name))
            .map_err(|e| UpdateError::Io(format!("Failed to replace {name}: {}", e.error)))?;
        Ok(())
    }

    /// Removes what older launchers left in `app/`: a `current` directory or
    /// symlink, and a `current.txt` path pointer which is migrated.
    fn cleanup_legacy(&self) {
        let legacy = self.app_dir.join(POINTER_FILE);
        if let Ok(meta) = fs::symlink_metadata(&legacy)
            && (meta.is_dir() || meta.file_type().is_symlink())
        {
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&legacy)
            } else {
                fs::remove_file(&legacy)
            };
            match removed {
                Ok(()) => tracing::info!("Removed legacy current: {}", legacy.display()),
                Err(e) => {
                    tracing::warn!("Failed to remove legacy current; renaming: {}", e);
                    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
                    let backup = self.app_dir.join(format!("current_old_{stamp}"));
                    if let Err(e) = fs::rename(&legacy, &backup) {
                        tracing::warn!("Failed to rename legacy current: {}", e);
                    }
                }
            }
        }

        let legacy_txt = self.app_dir.join(LEGACY_POINTER_FILE);
        let Ok(content) = fs::read_to_string(&legacy_txt) else {
            return;
        };
        let has_pointer = matches!(self.current_id(), Ok(Some(_)));
        if !has_pointer && let Some(id) = version_from_legacy_path(Path::new(content.trim())) {
            if self.contains(&id) {
                match self.write_pointer(POINTER_FILE, &id) {
                    Ok(()) => tracing::info!("Migrated legacy pointer to version {}", id),
                    Err(e) => {
                        tracing::warn!("Failed to migrate legacy pointer: {}", e);
                        return;
                    }
                }
            }
        }
        if let Err(e) = fs::remove_file(&legacy_txt) {
            tracing::warn!("Failed to remove {}: {}", legacy_txt.display(), e);
        }
    }

    /// Deletes `.staging-*` and `.removing-*` directories and partial
    /// downloads not touched for `min_age`. Failures are logged and left
    /// for the next start. Returns how many entries were removed.
    fn sweep_interrupted(&self, min_age: Duration) -> usize {
        let mut stale = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.app_dir) {
            stale.extend(entries.flatten().map(|e| e.path()).filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.starts_with(STAGING_PREFIX) || n.starts_with(REMOVING_PREFIX))
            }));
        }
        if let Ok(entries) = fs::read_dir(self.app_dir.join(DOWNLOADS_DIR)) {
            stale.extend(entries.flatten().map(|e| e.path()));
        }

        let mut removed = 0;
        for path in stale.into_iter().filter(|p| untouched_for(p, min_age)) {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    tracing::info!("Removed leftover {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to remove leftover {}: {}", path.display(), e),
            }
        }
        removed
    }
}

/// Whether `path` was last modified at least `min_age` ago. Entries whose
/// age cannot be determined count as stale.
fn untouched_for(path: &Path, min_age: Duration) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map_or(min_age.is_zero(), |age| age >= min_age),
        Err(_) => true,
    }
}

/// Extracts the version from a legacy path like `.../versions/1.2.0/app`.
fn version_from_legacy_path(path: &Path) -> Option<VersionId> {
    let mut components = path.components().map(|c| c.as_os_str().to_string_lossy());
    components.find(|c| c == VERSIONS_DIR)?;
    VersionId::new(components.next()?).ok()
}

/// Hash over the relative paths and contents of every file under `root`.
fn tree_digest(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hash_dir(root, root, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_dir(root: &Path, dir: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        if entry.file_type()?.is_dir() {
            hasher.update(b"/\0");
            hash_dir(root, &path, hasher)?;
        } else {
            hasher.update(b"\0");
            let mut file = File::open(&path)?;
            let mut buffer = [0u8; 8192];
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            hasher.update(b"\0");
        }
    }
    Ok(())
}
