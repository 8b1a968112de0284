//! Canonical transcript identity plus the on-disk layout used for raw HTML.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Errors raised when a slug, path or URL does not encode a transcript identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Slug did not match `{company}-q{n}-{yyyy}`.
    #[error("invalid slug format: {0}")]
    Slug(String),
    /// Path did not match `.../html/{company}/q{n}-{yyyy}.html`.
    #[error("invalid path format: {0}")]
    Path(String),
    /// URL did not contain `-{company}-q{n}-{yyyy}-`.
    #[error("unrecognized url format: {0}")]
    Url(String),
}

/// Identity of a single earnings call: (company, quarter, year).
///
/// Company and quarter are lowercased on construction so every derived form
/// (slug, storage path, chunk ids) is stable regardless of input casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TranscriptKey {
    company: String,
    quarter: String,
    year: u16,
}

impl TranscriptKey {
    /// Builds a key, normalizing company and quarter to lowercase.
    pub fn new(company: impl AsRef<str>, quarter: impl AsRef<str>, year: u16) -> Self {
        Self {
            company: company.as_ref().trim().to_lowercase(),
            quarter: quarter.as_ref().trim().to_lowercase(),
            year,
        }
    }

    /// Lowercase company ticker.
    pub fn company(&self) -> &str {
        &self.company
    }

    /// Lowercase quarter label (`q1`..`q4`).
    pub fn quarter(&self) -> &str {
        &self.quarter
    }

    /// Fiscal year.
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Manifest key, e.g. `aapl-q1-2024`.
    pub fn slug(&self) -> String {
        format!("{}-{}-{}", self.company, self.quarter, self.year)
    }

    /// Location of the raw HTML under `data_root`.
    pub fn to_path(&self, data_root: &Path) -> PathBuf {
        data_root
            .join("html")
            .join(&self.company)
            .join(format!("{}-{}.html", self.quarter, self.year))
    }

    /// Parses a manifest slug back into a key.
    pub fn from_slug(slug: &str) -> Result<Self, KeyError> {
        let lowered = slug.to_lowercase();
        let caps = slug_pattern()
            .captures(&lowered)
            .ok_or_else(|| KeyError::Slug(slug.to_string()))?;
        Self::from_captures(&caps).ok_or_else(|| KeyError::Slug(slug.to_string()))
    }

    /// Parses a storage path produced by [`TranscriptKey::to_path`].
    pub fn from_path(path: &Path) -> Result<Self, KeyError> {
        let display = path.to_string_lossy().replace('\\', "/").to_lowercase();
        let caps = path_pattern()
            .captures(&display)
            .ok_or_else(|| KeyError::Path(path.display().to_string()))?;
        Self::from_captures(&caps).ok_or_else(|| KeyError::Path(path.display().to_string()))
    }

    /// Extracts the key embedded in a transcript URL such as
    /// `.../apple-inc-aapl-q4-2019-earnings-call-transcript.aspx`.
    pub fn from_url(url: &str) -> Result<Self, KeyError> {
        let lowered = url.to_lowercase();
        let caps = url_pattern()
            .captures(&lowered)
            .ok_or_else(|| KeyError::Url(url.to_string()))?;
        Self::from_captures(&caps).ok_or_else(|| KeyError::Url(url.to_string()))
    }

    fn from_captures(caps: &regex::Captures<'_>) -> Option<Self> {
        let year = caps.get(3)?.as_str().parse().ok()?;
        Some(Self::new(caps.get(1)?.as_str(), caps.get(2)?.as_str(), year))
    }
}

impl fmt::Display for TranscriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug())
    }
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w+?)-(q\d)-(\d{4})$").expect("slug regex"))
}

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/html/(\w+)/(q\d)-(\d{4})\.html$").expect("path regex"))
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-([a-z0-9_]+)-(q\d)-(\d{4})-").expect("url regex"))
}

/// Raw HTML stored on the local filesystem, addressed by [`TranscriptKey`].
#[derive(Debug, Clone)]
pub struct LocalStorage {
    data_root: PathBuf,
}

impl LocalStorage {
    /// Creates storage rooted at `data_root`.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Root directory for all stored artifacts.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Writes a transcript's HTML, creating parent directories as needed.
    pub fn write_html(&self, key: &TranscriptKey, html: &str) -> io::Result<PathBuf> {
        let path = key.to_path(&self.data_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, html)?;
        Ok(path)
    }

    /// Reads a previously stored transcript.
    pub fn read_html(&self, key: &TranscriptKey) -> io::Result<String> {
        fs::read_to_string(key.to_path(&self.data_root))
    }
}
