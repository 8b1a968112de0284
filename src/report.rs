//! Run reports: processor counters plus the per-run artifacts written under the log dir.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

/// Timestamp format shared by every artifact written to the log dir.
pub const ARTIFACT_TS_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Counters and slug outcomes for one `ChunkProcessor`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    /// When `embed` started, RFC 3339.
    pub embed_started_at: Option<String>,
    /// Wall time spent in `embed`.
    pub embed_seconds: Option<f64>,
    /// When `upsert` started, RFC 3339.
    pub upsert_started_at: Option<String>,
    /// Wall time spent in `upsert`.
    pub upsert_seconds: Option<f64>,
    /// Chunks handed to the processor.
    pub total_chunks: usize,
    /// Chunks that received an embedding.
    pub embedded_chunks: usize,
    /// Chunks accepted by the index (or a dry run).
    pub upserted_chunks: usize,
    /// Chunks that failed in any stage.
    pub failed_chunks: usize,
    /// Transcripts whose every touched chunk succeeded.
    pub successful_slugs: BTreeSet<String>,
    /// Transcripts with at least one failed chunk.
    pub failed_slugs: BTreeSet<String>,
}

/// Whole ingest or refresh run, as persisted to `{mode}_report_{ts}.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `ingest`, `retry` or `refresh`.
    pub mode: String,
    /// Run start, RFC 3339.
    pub started_at: String,
    /// Transcripts selected from the manifest.
    pub selected: usize,
    /// Transcripts that parsed into at least one chunk.
    pub parsed: usize,
    /// Parse failures keyed by slug.
    pub parse_failures: BTreeMap<String, String>,
    /// Processor outcome.
    pub processor: PipelineReport,
    /// Metadata refresh failures, refresh runs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_failures: Option<usize>,
    /// Total wall time.
    pub runtime_seconds: f64,
    /// Whether network side effects were skipped.
    pub dry_run: bool,
}

impl RunReport {
    /// Empty report stamped with the current time.
    pub fn start(mode: &str, dry_run: bool) -> Self {
        Self {
            mode: mode.to_string(),
            started_at: Utc::now().to_rfc3339(),
            selected: 0,
            parsed: 0,
            parse_failures: BTreeMap::new(),
            processor: PipelineReport::default(),
            refresh_failures: None,
            runtime_seconds: 0.0,
            dry_run,
        }
    }

    /// Writes `{log_dir}/{mode}_report_{ts}.json` and returns its path.
    pub fn save(&self, log_dir: &Path) -> Result<PathBuf> {
        let name = format!("{}_report_{}.json", self.mode, Utc::now().format(ARTIFACT_TS_FORMAT));
        write_json_artifact(log_dir, &name, self)
    }
}

/// Pretty-prints `value` into `{dir}/{name}`, creating `dir` as needed.
pub fn write_json_artifact<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(value).context("failed to serialize artifact")?;
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_report_lands_under_mode_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::start("retry", true);
        report.processor.failed_slugs.insert("aapl-q1-2024".into());
        let path = report.save(dir.path()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("retry_report_"));
        assert!(name.ends_with(".json"));
        let body: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["processor"]["failed_slugs"][0], "aapl-q1-2024");
        assert!(body.get("refresh_failures").is_none());
    }
}
