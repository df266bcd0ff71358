//! Archive extraction into a staging directory.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{Result, UpdateError};

/// Archive type for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// tar.gz archive
    TarGz,
    /// ZIP archive
    Zip,
}

impl ArchiveType {
    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "ZIP",
        }
    }
}

impl std::fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Detects the archive type from the file name, falling back to the magic
/// bytes at the start of the file.
pub fn detect_archive_type(path: &Path) -> Result<ArchiveType> {
    let name_lower = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name_lower = name_lower.strip_suffix(".part").unwrap_or(&name_lower);

    if name_lower.ends_with(".tar.gz") || name_lower.ends_with(".tgz") {
        return Ok(ArchiveType::TarGz);
    }
    if name_lower.ends_with(".zip") {
        return Ok(ArchiveType::Zip);
    }

    let mut magic = [0u8; 4];
    let read = File::open(path)?.read(&mut magic)?;
    match &magic[..read] {
        [0x50, 0x4b, 0x03, 0x04] => Ok(ArchiveType::Zip),
        [0x1f, 0x8b, ..] => Ok(ArchiveType::TarGz),
        _ => Err(UpdateError::Install(format!(
            "unrecognized archive format: {}",
            path.display()
        ))),
    }
}

/// Counts reported after an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written.
    pub files: usize,
    /// Total bytes written.
    pub bytes: u64,
}

/// Extracts `archive` into the existing directory `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ExtractSummary> {
    let archive_type = detect_archive_type(archive)?;
    tracing::debug!(
        "Extracting {} archive {} into {}",
        archive_type,
        archive.display(),
        dest.display()
    );

    let summary = match archive_type {
        ArchiveType::Zip => extract_zip(archive, dest)?,
        ArchiveType::TarGz => extract_tar_gz(archive, dest)?,
    };

    tracing::info!(
        "Extracted {} files ({} bytes) from {}",
        summary.files,
        summary.bytes,
        archive.display()
    );
    Ok(summary)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<ExtractSummary> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    let mut summary = ExtractSummary::default();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        // enclosed_name rejects absolute paths and `..` traversal.
        let Some(relative) = entry.enclosed_name() else {
            return Err(UpdateError::Install(format!(
                "archive entry escapes the install directory: {}",
                entry.name()
            )));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| install_io("create directory", &target, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| install_io("create directory", parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| install_io("create file", &target, e))?;
        summary.bytes += io::copy(&mut entry, &mut out)
            .map_err(|e| install_io("write file", &target, e))?;
        summary.files += 1;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| install_io("set permissions", &target, e))?;
        }
    }

    Ok(summary)
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<ExtractSummary> {
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    let mut summary = ExtractSummary::default();

    let entries = tar
        .entries()
        .map_err(|e| UpdateError::Install(format!("Failed to read tar entries: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| UpdateError::Install(format!("Failed to read tar entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| UpdateError::Install(format!("Failed to read entry path: {e}")))?
            .into_owned();

        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(UpdateError::Install(format!(
                "archive entry escapes the install directory: {}",
                path.display()
            )));
        }

        let is_file = entry.header().entry_type().is_file();
        let size = entry.size();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| install_io("unpack", &dest.join(&path), e))?;
        if unpacked && is_file {
            summary.files += 1;
            summary.bytes += size;
        }
    }

    Ok(summary)
}

/// Recursively copies the directory `src` into `dest` (created if absent).
pub fn copy_tree(src: &Path, dest: &Path) -> Result<ExtractSummary> {
    let mut summary = ExtractSummary::default();
    copy_tree_inner(src, dest, &mut summary)?;
    Ok(summary)
}

fn copy_tree_inner(src: &Path, dest: &Path, summary: &mut ExtractSummary) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| install_io("create directory", dest, e))?;
    for entry in fs::read_dir(src).map_err(|e| install_io("read directory", src, e))? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree_inner(&from, &to, summary)?;
        } else {
            summary.bytes += fs::copy(&from, &to).map_err(|e| install_io("copy", &from, e))?;
            summary.files += 1;
        }
    }
    Ok(())
}

fn install_io(action: &str, path: &Path, err: io::Error) -> UpdateError {
    UpdateError::Install(format!("Failed to {action} {}: {err}", path.display()))
}
