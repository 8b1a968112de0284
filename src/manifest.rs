//! Durable per-transcript progress manifest.
//!
//! The manifest is a pretty-printed JSON object keyed by slug and is the only
//! authoritative record of pipeline progress across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::key::TranscriptKey;

/// Default manifest location relative to the working directory.
pub const DEFAULT_MANIFEST_PATH: &str = "data/status/manifest.json";

/// Pipeline stage tracked per transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Raw HTML stored locally.
    HtmlSaved,
    /// HTML parsed into chunks.
    Parsed,
    /// Chunks embedded and upserted.
    Embedded,
}

impl Step {
    /// Field name, also the prefix of `failed_at_step` annotations.
    pub fn as_str(self) -> &'static str {
        match self {
            Step::HtmlSaved => "html_saved",
            Step::Parsed => "parsed",
            Step::Embedded => "embedded",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record for one transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Source page URL.
    pub url: String,
    /// First discovery time, RFC 3339.
    pub discovered_at: String,
    /// HTML stored locally.
    pub html_saved: bool,
    /// Parsed into chunks.
    pub parsed: bool,
    /// Embedded and upserted.
    pub embedded: bool,
    /// `"{step}: {error}"` for the most recent failure, cleared on success.
    pub failed_at_step: Option<String>,
    /// Time of the most recent mark, RFC 3339.
    pub last_attempt: Option<String>,
}

impl ManifestEntry {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            discovered_at: Utc::now().to_rfc3339(),
            html_saved: false,
            parsed: false,
            embedded: false,
            failed_at_step: None,
            last_attempt: None,
        }
    }

    /// Flag value for `step`.
    pub fn flag(&self, step: Step) -> bool {
        match step {
            Step::HtmlSaved => self.html_saved,
            Step::Parsed => self.parsed,
            Step::Embedded => self.embedded,
        }
    }

    fn set_flag(&mut self, step: Step, value: bool) {
        match step {
            Step::HtmlSaved => self.html_saved = value,
            Step::Parsed => self.parsed = value,
            Step::Embedded => self.embedded = value,
        }
    }
}

/// Failures raised by [`StatusTracker`].
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A mark referenced a slug that was never added.
    #[error("slug not found in manifest: {0}")]
    UnknownSlug(String),
    /// The manifest file could not be read or written.
    #[error("manifest io error at {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The manifest file is not valid JSON of the expected shape.
    #[error("manifest at {path} is malformed: {source}")]
    Malformed {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Counts per flag, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    /// Entries in the manifest.
    pub total: usize,
    /// Entries with `html_saved`.
    pub html_saved: usize,
    /// Entries with `parsed`.
    pub parsed: usize,
    /// Entries with `embedded`.
    pub embedded: usize,
    /// Entries carrying a failure annotation.
    pub failed: usize,
}

/// Single-writer manifest with atomic persistence.
pub struct StatusTracker {
    path: PathBuf,
    entries: BTreeMap<String, ManifestEntry>,
    autosave: bool,
    dirty: bool,
}

impl StatusTracker {
    /// Loads `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>, autosave: bool) -> Result<Self, ManifestError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(body) => serde_json::from_str(&body).map_err(|source| ManifestError::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(ManifestError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries,
            autosave,
            dirty: false,
        })
    }

    /// Manifest file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a newly discovered transcript. Existing slugs are left untouched.
    pub fn add(&mut self, key: &TranscriptKey, url: &str) -> Result<bool, ManifestError> {
        let slug = key.slug();
        if self.entries.contains_key(&slug) {
            return Ok(false);
        }
        self.entries.insert(slug, ManifestEntry::new(url));
        self.touch()?;
        Ok(true)
    }

    /// Sets `step` and clears any failure annotation.
    pub fn mark_success(&mut self, slug: &str, step: Step) -> Result<(), ManifestError> {
        let entry = self.entry_mut(slug)?;
        entry.set_flag(step, true);
        entry.failed_at_step = None;
        entry.last_attempt = Some(Utc::now().to_rfc3339());
        self.touch()
    }

    /// Clears `step` and records `"{step}: {error}"`.
    pub fn mark_failure(&mut self, slug: &str, step: Step, error: &str) -> Result<(), ManifestError> {
        let entry = self.entry_mut(slug)?;
        entry.set_flag(step, false);
        entry.failed_at_step = Some(format!("{step}: {error}"));
        entry.last_attempt = Some(Utc::now().to_rfc3339());
        self.touch()
    }

    /// Slugs whose `step` flag equals `status`.
    pub fn filter_for(&self, step: Step, status: bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.flag(step) == status)
            .map(|(slug, _)| slug.clone())
            .collect()
    }

    /// Slugs whose failure annotation starts with `step`'s name.
    pub fn failed_at(&self, step: Step) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .failed_at_step
                    .as_deref()
                    .is_some_and(|annotation| annotation.starts_with(step.as_str()))
            })
            .map(|(slug, _)| slug.clone())
            .collect()
    }

    /// Source URL for `slug`.
    pub fn url(&self, slug: &str) -> Option<&str> {
        self.entries.get(slug).map(|entry| entry.url.as_str())
    }

    /// Full record for `slug`.
    pub fn entry(&self, slug: &str) -> Option<&ManifestEntry> {
        self.entries.get(slug)
    }

    /// Iterates entries in slug order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(slug, entry)| (slug.as_str(), entry))
    }

    /// Number of tracked transcripts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been discovered yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts per flag.
    pub fn summary(&self) -> ManifestSummary {
        let mut summary = ManifestSummary {
            total: self.entries.len(),
            ..ManifestSummary::default()
        };
        for entry in self.entries.values() {
            summary.html_saved += usize::from(entry.html_saved);
            summary.parsed += usize::from(entry.parsed);
            summary.embedded += usize::from(entry.embedded);
            summary.failed += usize::from(entry.failed_at_step.is_some());
        }
        summary
    }

    /// Entries marked `embedded` without `parsed`.
    ///
    /// Marks never enforce step ordering, so a later parse failure on an embedded
    /// transcript surfaces here rather than being rejected.
    pub fn inconsistent_slugs(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.embedded && !entry.parsed)
            .map(|(slug, _)| slug.clone())
            .collect()
    }

    /// Writes the manifest if it changed since the last write.
    pub fn save(&mut self) -> Result<(), ManifestError> {
        if !self.dirty {
            return Ok(());
        }
        self.write_atomic().map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }

    fn write_atomic(&self) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let body = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn entry_mut(&mut self, slug: &str) -> Result<&mut ManifestEntry, ManifestError> {
        self.entries
            .get_mut(slug)
            .ok_or_else(|| ManifestError::UnknownSlug(slug.to_string()))
    }

    fn touch(&mut self) -> Result<(), ManifestError> {
        self.dirty = true;
        if self.autosave {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://www.fool.com/earnings/call-transcripts/2024/02/01/apple-aapl-q1-2024-earnings-call-transcript/";

    fn key() -> TranscriptKey {
        TranscriptKey::new("aapl", "q1", 2024)
    }

    #[test]
    fn add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StatusTracker::open(dir.path().join("manifest.json"), true).unwrap();
        assert!(tracker.add(&key(), URL).unwrap());
        tracker.mark_success("aapl-q1-2024", Step::HtmlSaved).unwrap();
        assert!(!tracker.add(&key(), "https://elsewhere.example/").unwrap());

        let entry = tracker.entry("aapl-q1-2024").unwrap();
        assert_eq!(entry.url, URL);
        assert!(entry.html_saved);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn retry_selection_then_success_clears_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status").join("manifest.json");
        let mut tracker = StatusTracker::open(&path, true).unwrap();
        tracker.add(&key(), URL).unwrap();
        tracker.mark_success("aapl-q1-2024", Step::HtmlSaved).unwrap();
        tracker.mark_success("aapl-q1-2024", Step::Parsed).unwrap();
        tracker
            .mark_failure("aapl-q1-2024", Step::Embedded, "upsert batch of 3 vectors failed")
            .unwrap();

        let entry = tracker.entry("aapl-q1-2024").unwrap();
        assert_eq!(
            entry.failed_at_step.as_deref(),
            Some("embedded: upsert batch of 3 vectors failed")
        );
        assert_eq!(tracker.failed_at(Step::Embedded), vec!["aapl-q1-2024"]);
        assert!(tracker.failed_at(Step::Parsed).is_empty());
        assert_eq!(tracker.filter_for(Step::Embedded, false), vec!["aapl-q1-2024"]);

        tracker.mark_success("aapl-q1-2024", Step::Embedded).unwrap();
        let reloaded = StatusTracker::open(&path, true).unwrap();
        let entry = reloaded.entry("aapl-q1-2024").unwrap();
        assert!(entry.embedded);
        assert_eq!(entry.failed_at_step, None);
        assert!(entry.last_attempt.is_some());
        assert!(reloaded.failed_at(Step::Embedded).is_empty());
    }

    #[test]
    fn failure_after_success_clears_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StatusTracker::open(dir.path().join("manifest.json"), false).unwrap();
        tracker.add(&key(), URL).unwrap();
        tracker.mark_success("aapl-q1-2024", Step::Parsed).unwrap();
        assert!(tracker.entry("aapl-q1-2024").unwrap().parsed);

        tracker
            .mark_failure("aapl-q1-2024", Step::Parsed, "no prepared remarks heading")
            .unwrap();
        let entry = tracker.entry("aapl-q1-2024").unwrap();
        assert!(!entry.parsed);
        assert_eq!(
            entry.failed_at_step.as_deref(),
            Some("parsed: no prepared remarks heading")
        );
        assert_eq!(tracker.filter_for(Step::Parsed, false), vec!["aapl-q1-2024"]);
        assert_eq!(tracker.failed_at(Step::Parsed), vec!["aapl-q1-2024"]);
    }

    #[test]
    fn filter_for_matches_only_the_requested_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StatusTracker::open(dir.path().join("manifest.json"), false).unwrap();
        for company in ["aapl", "amzn", "msft", "nvda"] {
            tracker.add(&TranscriptKey::new(company, "q1", 2024), URL).unwrap();
        }
        // aapl: neither step. amzn: parsed only. msft: both. nvda: embedded only.
        tracker.mark_success("amzn-q1-2024", Step::Parsed).unwrap();
        tracker.mark_success("msft-q1-2024", Step::Parsed).unwrap();
        tracker.mark_success("msft-q1-2024", Step::Embedded).unwrap();
        tracker.mark_success("nvda-q1-2024", Step::Embedded).unwrap();

        assert_eq!(
            tracker.filter_for(Step::Parsed, false),
            vec!["aapl-q1-2024", "nvda-q1-2024"]
        );
        assert_eq!(
            tracker.filter_for(Step::Parsed, true),
            vec!["amzn-q1-2024", "msft-q1-2024"]
        );
        assert_eq!(
            tracker.filter_for(Step::Embedded, false),
            vec!["aapl-q1-2024", "amzn-q1-2024"]
        );
        assert_eq!(
            tracker.filter_for(Step::HtmlSaved, false),
            vec!["aapl-q1-2024", "amzn-q1-2024", "msft-q1-2024", "nvda-q1-2024"]
        );
    }

    #[test]
    fn unknown_slug_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StatusTracker::open(dir.path().join("manifest.json"), true).unwrap();
        let err = tracker.mark_success("tsla-q4-2023", Step::Parsed).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownSlug(slug) if slug == "tsla-q4-2023"));
    }

    #[test]
    fn manual_save_skips_clean_state_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut tracker = StatusTracker::open(&path, false).unwrap();
        tracker.add(&key(), URL).unwrap();
        assert!(!path.exists());

        tracker.save().unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n  \"aapl-q1-2024\": {"));
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);

        fs::remove_file(&path).unwrap();
        tracker.save().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn summary_and_inconsistency_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StatusTracker::open(dir.path().join("manifest.json"), false).unwrap();
        tracker.add(&key(), URL).unwrap();
        tracker.add(&TranscriptKey::new("msft", "q2", 2024), URL).unwrap();
        tracker.mark_success("aapl-q1-2024", Step::Embedded).unwrap();
        tracker
            .mark_failure("msft-q2-2024", Step::Parsed, "missing prepared remarks")
            .unwrap();

        assert_eq!(
            tracker.summary(),
            ManifestSummary {
                total: 2,
                html_saved: 0,
                parsed: 0,
                embedded: 1,
                failed: 1,
            }
        );
        assert_eq!(tracker.inconsistent_slugs(), vec!["aapl-q1-2024"]);
    }

    #[test]
    fn malformed_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            StatusTracker::open(&path, true),
            Err(ManifestError::Malformed { .. })
        ));
    }
}
