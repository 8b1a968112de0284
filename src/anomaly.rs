//! Append-only, deduplicated log of speaker titles the classifier had to guess at.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

/// Shared sink for unrecognized `chief ... officer` titles.
///
/// Parser workers share one instance; the mutex serializes both the seen-set and the
/// file append so a title is written at most once per log file.
pub struct AnomalyLog {
    inner: Mutex<AnomalyState>,
}

struct AnomalyState {
    path: Option<PathBuf>,
    seen: HashSet<String>,
    recorded: Vec<String>,
}

impl AnomalyLog {
    /// Opens (or prepares to create) a file-backed log, preloading already logged titles.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let seen = load_titles(&path)?;
        Ok(Self::with_state(Some(path), seen))
    }

    /// Log that keeps entries in memory only.
    pub fn in_memory() -> Self {
        Self::with_state(None, HashSet::new())
    }

    fn with_state(path: Option<PathBuf>, seen: HashSet<String>) -> Self {
        Self {
            inner: Mutex::new(AnomalyState {
                path,
                seen,
                recorded: Vec::new(),
            }),
        }
    }

    /// Records `title` unless it was already seen. Returns `true` when newly recorded.
    ///
    /// Write failures are reported through `tracing` rather than returned: the log is a
    /// side channel and must never fail a parse.
    pub fn record(&self, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.seen.insert(title.to_string()) {
            return false;
        }
        state.recorded.push(title.to_string());
        tracing::info!(title, "new speaker title");
        if let Some(path) = state.path.clone() {
            if let Err(err) = append_title(&path, title) {
                tracing::warn!(error = %err, path = %path.display(), "failed to append anomaly log");
            }
        }
        true
    }

    /// Titles recorded through this instance, in order.
    pub fn recorded(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(state) => state.recorded.clone(),
            Err(poisoned) => poisoned.into_inner().recorded.clone(),
        }
    }
}

fn load_titles(path: &Path) -> io::Result<HashSet<String>> {
    let mut titles = HashSet::new();
    if !path.exists() {
        return Ok(titles);
    }
    let reader = BufReader::new(fs::File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let title = line.split(" | ").next().unwrap_or_default().trim();
        if !title.is_empty() {
            titles.insert(title.to_string());
        }
    }
    Ok(titles)
}

fn append_title(path: &Path, title: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let first_seen = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    writeln!(file, "{title} | first_seen: {first_seen}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_each_title_once() {
        let log = AnomalyLog::in_memory();
        assert!(log.record("chief revenue officer"));
        assert!(!log.record("  chief revenue officer "));
        assert!(log.record("chief people officer"));
        assert_eq!(
            log.recorded(),
            vec!["chief revenue officer", "chief people officer"]
        );
    }

    #[test]
    fn file_log_skips_titles_from_previous_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/unhandled_titles.txt");

        let first = AnomalyLog::open(&path).unwrap();
        assert!(first.record("chief legal officer"));

        let second = AnomalyLog::open(&path).unwrap();
        assert!(!second.record("chief legal officer"));
        assert!(second.record("chief digital officer"));

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with("chief legal officer | first_seen: "));
    }
}
