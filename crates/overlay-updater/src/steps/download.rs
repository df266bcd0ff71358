//! Streaming archive download with progress, hashing and cancellation.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::error::{Result, UpdateError};
use crate::steps::verify::verify_sha256;

/// Progress update interval.
const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Read buffer size.
const CHUNK_SIZE: usize = 64 * 1024;

/// Shared flag used to cancel a running update.
///
/// Cloning shares the flag. The orchestrator polls it between download
/// chunks and ignores it while an install is in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Download progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Total bytes to download (0 when unknown).
    pub total: u64,
    /// Current download speed in bytes per second (smoothed average).
    pub speed: u64,
}

impl DownloadProgress {
    /// Returns the progress as a fraction (0.0 to 1.0).
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total as f64) as f32
    }

    /// Returns the progress as a percentage (0 to 100).
    #[must_use]
    pub fn percentage(&self) -> u8 {
        (self.fraction() * 100.0).min(100.0) as u8
    }
}

/// Download progress tracker with smoothed speed calculation.
struct ProgressTracker {
    downloaded: u64,
    total: u64,
    started: Instant,
    samples: Vec<(Duration, u64)>,
    last_emit: Option<Instant>,
    max_samples: usize,
}

impl ProgressTracker {
    fn new(total: u64) -> Self {
        Self {
            downloaded: 0,
            total,
            started: Instant::now(),
            samples: Vec::with_capacity(20),
            last_emit: None,
            max_samples: 20, // ~2 seconds at 100ms updates
        }
    }

    fn update(&mut self, downloaded: u64) {
        self.downloaded = downloaded;
        self.samples.push((self.started.elapsed(), downloaded));
        if self.samples.len() > self.max_samples {
            self.samples.remove(0);
        }
    }

    fn speed(&self) -> u64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0;
        };
        let elapsed = last.0.saturating_sub(first.0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }
        (last.1.saturating_sub(first.1) as f64 / elapsed) as u64
    }

    fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < PROGRESS_UPDATE_INTERVAL => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    fn to_progress(&self) -> DownloadProgress {
        DownloadProgress {
            downloaded: self.downloaded,
            total: self.total,
            speed: self.speed(),
        }
    }
}

/// A fully received archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArchive {
    /// Location of the archive file.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Lowercase hex SHA256 of the file.
    pub sha256: String,
}

/// Parameters of one download.
#[derive(Debug, Clone, Copy)]
pub struct DownloadTarget<'a> {
    /// Destination file; replaced if present, removed on failure.
    pub dest: &'a Path,
    /// Expected size in bytes (0 when unknown).
    pub expected_size: u64,
    /// Expected SHA256 digest, if the release provides one.
    pub expected_digest: Option<&'a str>,
}

/// Copies `reader` into `target.dest`, hashing as it goes.
///
/// A read error or a short body is a [`UpdateError::Network`]; a digest
/// mismatch is [`UpdateError::Integrity`]. The destination file never
/// survives a failed call.
pub fn stream_to_file(
    reader: &mut dyn Read,
    target: DownloadTarget<'_>,
    progress: &mut dyn FnMut(DownloadProgress),
    cancel: &CancelToken,
) -> Result<DownloadedArchive> {
    let result = stream_inner(reader, target, progress, cancel);
    if result.is_err() {
        let _ = fs::remove_file(target.dest);
    }
    result
}

fn stream_inner(
    reader: &mut dyn Read,
    target: DownloadTarget<'_>,
    progress: &mut dyn FnMut(DownloadProgress),
    cancel: &CancelToken,
) -> Result<DownloadedArchive> {
    if let Some(parent) = target.dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(target.dest)?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();
    let mut tracker = ProgressTracker::new(target.expected_size);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        if cancel.is_cancelled() {
            tracing::info!("Download cancelled after {} bytes", tracker.downloaded);
            return Err(UpdateError::Cancelled);
        }

        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(UpdateError::Network(format!(
                    "download interrupted after {} bytes: {e}",
                    tracker.downloaded
                )));
            }
        };

        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read])?;
        tracker.update(tracker.downloaded + read as u64);

        if tracker.should_emit() {
            progress(tracker.to_progress());
        }
    }

    if target.expected_size > 0 && tracker.downloaded != target.expected_size {
        return Err(UpdateError::Network(format!(
            "download incomplete: received {} of {} bytes",
            tracker.downloaded, target.expected_size
        )));
    }

    let file = writer
        .into_inner()
        .map_err(|e| UpdateError::Io(e.error().to_string()))?;
    file.sync_all()?;
    progress(tracker.to_progress());

    let sha256 = hex::encode(hasher.finalize());
    match target.expected_digest {
        Some(digest) => verify_sha256(&sha256, digest)?,
        None => tracing::warn!(
            "No digest published for {}; skipping integrity check",
            target.dest.display()
        ),
    }

    tracing::info!(
        "Download complete: {} ({})",
        target.dest.display(),
        format_bytes(tracker.downloaded)
    );

    Ok(DownloadedArchive {
        path: target.dest.to_path_buf(),
        size: tracker.downloaded,
        sha256,
    })
}

/// Format bytes as a human-readable string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
