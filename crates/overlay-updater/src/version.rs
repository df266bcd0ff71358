//! Version identifiers and update comparisons.
//!
//! A [`VersionId`] names one installed build and doubles as its directory
//! name under `app/versions/`. Identifiers are opaque by default; when both
//! sides of a comparison parse as a [`Version`] (e.g. "v1.3.0", "2.0",
//! "1.0.0-beta.1") they are ordered by standard precedence.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};

/// Pre-release identifier for version comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreRelease {
    /// Alpha release (e.g., "alpha.1").
    Alpha(u32),
    /// Beta release (e.g., "beta.2").
    Beta(u32),
    /// Release candidate (e.g., "rc.1").
    ReleaseCandidate(u32),
}

impl PreRelease {
    /// Parse a pre-release string (e.g., "beta.1", "alpha.2", "rc.3").
    fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase();

        if let Some(num) = s.strip_prefix("alpha.") {
            num.parse().ok().map(PreRelease::Alpha)
        } else if let Some(num) = s.strip_prefix("beta.") {
            num.parse().ok().map(PreRelease::Beta)
        } else if let Some(num) = s.strip_prefix("rc.") {
            num.parse().ok().map(PreRelease::ReleaseCandidate)
        } else if s == "alpha" {
            Some(PreRelease::Alpha(0))
        } else if s == "beta" {
            Some(PreRelease::Beta(0))
        } else if s == "rc" {
            Some(PreRelease::ReleaseCandidate(0))
        } else {
            None
        }
    }

    /// Get the ordering priority (alpha < beta < rc).
    fn priority(&self) -> u8 {
        match self {
            PreRelease::Alpha(_) => 0,
            PreRelease::Beta(_) => 1,
            PreRelease::ReleaseCandidate(_) => 2,
        }
    }

    fn number(&self) -> u32 {
        match self {
            PreRelease::Alpha(n) | PreRelease::Beta(n) | PreRelease::ReleaseCandidate(n) => *n,
        }
    }
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority().cmp(&other.priority()) {
            Ordering::Equal => self.number().cmp(&other.number()),
            other => other,
        }
    }
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreRelease::Alpha(n) => write!(f, "alpha.{n}"),
            PreRelease::Beta(n) => write!(f, "beta.{n}"),
            PreRelease::ReleaseCandidate(n) => write!(f, "rc.{n}"),
        }
    }
}

/// A parsed version number with optional pre-release tag.
///
/// Missing minor/patch components default to zero, so "0" and "2.1" are
/// accepted. Unknown pre-release labels make the string unparseable, which
/// leaves the identifier opaque.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Version {
    /// Major version number.
    pub major: u32,
    /// Minor version number.
    pub minor: u32,
    /// Patch version number.
    pub patch: u32,
    /// Optional pre-release identifier.
    pub pre_release: Option<PreRelease>,
}

impl Version {
    /// Create a new stable version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Check if this version is a pre-release (alpha, beta, or rc).
    #[must_use]
    pub fn is_pre_release(&self) -> bool {
        self.pre_release.is_some()
    }

    /// Check if this version is a stable release.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.pre_release.is_none()
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let invalid = || UpdateError::InvalidVersion(s.to_string());

        // Build metadata never affects precedence.
        let s_no_build = s.split('+').next().unwrap_or(s);

        let (version_part, pre_release) = match s_no_build.split_once('-') {
            Some((v, p)) => (v, Some(PreRelease::parse(p).ok_or_else(invalid)?)),
            None => (s_no_build, None),
        };

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre_release,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| {
                // 1.0.0-beta.1 < 1.0.0
                match (&self.pre_release, &other.pre_release) {
                    (None, None) => Ordering::Equal,
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(a), Some(b)) => a.cmp(b),
                }
            })
    }
}

/// Identifier of one installed build, e.g. "1.3.0" or "0".
///
/// The identifier is used verbatim as a directory name, so it must be a
/// single, non-hidden path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Validates and wraps an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('.')
            || trimmed.len() > 128
            || trimmed
                .chars()
                .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control())
        {
            return Err(UpdateError::InvalidVersion(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derives an identifier from a release tag, dropping a "v" prefix
    /// that precedes a digit ("v1.3.0" becomes "1.3.0").
    pub fn from_tag(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let stripped = match tag.strip_prefix(['v', 'V']) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
            _ => tag,
        };
        Self::new(stripped)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the identifier as a version number, if it is one.
    #[must_use]
    pub fn parsed(&self) -> Option<Version> {
        Version::from_str(&self.0).ok()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionId {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = UpdateError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

/// Outcome of comparing a candidate release against the installed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Candidate has higher precedence.
    Newer,
    /// Candidate names the installed build.
    Same,
    /// Candidate has lower precedence.
    Older,
    /// Identifiers are opaque and differ; treated as an update.
    Different,
}

impl Comparison {
    /// Whether the candidate should be installed.
    #[must_use]
    pub const fn is_update(self) -> bool {
        matches!(self, Self::Newer | Self::Different)
    }
}

/// Compares `candidate` against `installed`.
#[must_use]
pub fn compare(installed: &VersionId, candidate: &VersionId) -> Comparison {
    if installed == candidate {
        return Comparison::Same;
    }
    match (installed.parsed(), candidate.parsed()) {
        (Some(a), Some(b)) => match b.cmp(&a) {
            Ordering::Greater => Comparison::Newer,
            Ordering::Equal => Comparison::Same,
            Ordering::Less => Comparison::Older,
        },
        _ => Comparison::Different,
    }
}

/// Orders identifiers for "latest installed" selection: parseable versions
/// by precedence and above opaque ones, opaque ones lexicographically.
#[must_use]
pub fn precedence(a: &VersionId, b: &VersionId) -> Ordering {
    match (a.parsed(), b.parsed()) {
        (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
