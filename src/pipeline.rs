//! Ingest, retry and refresh runs composed from the parser, processor and manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Instant;

use anyhow::Result;
use crossbeam_channel::bounded;
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::index::{MetadataIndex, VectorIndex};
use crate::key::{LocalStorage, TranscriptKey};
use crate::manifest::{StatusTracker, Step};
use crate::model::TranscriptChunk;
use crate::parser::TranscriptParser;
use crate::processor::{ChunkProcessor, ProcessorConfig};
use crate::report::RunReport;

/// Which manifest entries an ingest run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Stored HTML that has never been embedded and carries no failure.
    Pending,
    /// Entries whose last failure happened while parsing or embedding.
    Retry,
}

impl IngestMode {
    /// Label used for run reports.
    pub fn as_str(self) -> &'static str {
        match self {
            IngestMode::Pending => "ingest",
            IngestMode::Retry => "retry",
        }
    }
}

/// Slugs an ingest run should process, in slug order.
pub fn select_slugs(tracker: &StatusTracker, mode: IngestMode) -> Vec<String> {
    match mode {
        IngestMode::Pending => {
            let not_embedded: BTreeSet<String> =
                tracker.filter_for(Step::Embedded, false).into_iter().collect();
            tracker
                .filter_for(Step::HtmlSaved, true)
                .into_iter()
                .filter(|slug| not_embedded.contains(slug))
                .filter(|slug| {
                    tracker
                        .entry(slug)
                        .is_some_and(|entry| entry.failed_at_step.is_none())
                })
                .collect()
        }
        IngestMode::Retry => {
            let mut slugs = tracker.failed_at(Step::Parsed);
            slugs.extend(tracker.failed_at(Step::Embedded));
            slugs.sort();
            slugs.dedup();
            slugs
        }
    }
}

struct ParseJob {
    slug: String,
    key: TranscriptKey,
    url: String,
}

/// Parses stored transcripts on a bounded worker pool.
///
/// Results are keyed by slug; each value is the chunk list or the failure text.
pub fn parse_all(
    parser: &TranscriptParser<'_>,
    storage: &LocalStorage,
    jobs: Vec<(TranscriptKey, String)>,
    workers: usize,
) -> BTreeMap<String, Result<Vec<TranscriptChunk>, String>> {
    let workers = workers.max(1);
    let (job_tx, job_rx) = bounded::<ParseJob>(workers * 2);
    let (result_tx, result_rx) = bounded(workers * 2);

    thread::scope(|scope| {
        scope.spawn(move || {
            for (key, url) in jobs {
                let job = ParseJob {
                    slug: key.slug(),
                    key,
                    url,
                };
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for job in job_rx {
                    let outcome = parse_one(parser, storage, &job);
                    if let Err(reason) = &outcome {
                        warn!(worker_id, slug = %job.slug, error = %reason, "parse failed");
                    }
                    if result_tx.send((job.slug, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        result_rx.iter().collect()
    })
}

fn parse_one(
    parser: &TranscriptParser<'_>,
    storage: &LocalStorage,
    job: &ParseJob,
) -> Result<Vec<TranscriptChunk>, String> {
    let html = storage
        .read_html(&job.key)
        .map_err(|err| format!("failed to read stored html: {err}"))?;
    let chunks = parser
        .parse(&html, &job.key, &job.url)
        .map_err(|err| err.to_string())?;
    if chunks.is_empty() {
        return Err("no chunks emitted".to_string());
    }
    Ok(chunks)
}

/// Shared inputs for every run.
pub struct Pipeline<'a> {
    parser: TranscriptParser<'a>,
    storage: &'a LocalStorage,
    processor: ProcessorConfig,
    workers: usize,
}

impl<'a> Pipeline<'a> {
    /// Wires the parser, storage and processor settings together.
    pub fn new(
        parser: TranscriptParser<'a>,
        storage: &'a LocalStorage,
        processor: ProcessorConfig,
        workers: usize,
    ) -> Self {
        Self {
            parser,
            storage,
            processor,
            workers,
        }
    }

    /// Parses `slugs`, marking each `parsed` outcome, and returns every emitted chunk.
    pub fn prepare(
        &self,
        tracker: &mut StatusTracker,
        slugs: &[String],
        report: &mut RunReport,
    ) -> Result<Vec<TranscriptChunk>> {
        report.selected = slugs.len();
        let mut jobs = Vec::with_capacity(slugs.len());
        for slug in slugs {
            let Some(url) = tracker.url(slug) else {
                continue;
            };
            match TranscriptKey::from_slug(slug) {
                Ok(key) => jobs.push((key, url.to_string())),
                Err(err) => {
                    tracker.mark_failure(slug, Step::Parsed, &err.to_string())?;
                    report.parse_failures.insert(slug.clone(), err.to_string());
                }
            }
        }

        let results = parse_all(&self.parser, self.storage, jobs, self.workers);
        let mut chunks = Vec::new();
        for (slug, outcome) in results {
            match outcome {
                Ok(parsed) => {
                    tracker.mark_success(&slug, Step::Parsed)?;
                    report.parsed += 1;
                    chunks.extend(parsed);
                }
                Err(reason) => {
                    tracker.mark_failure(&slug, Step::Parsed, &reason)?;
                    report.parse_failures.insert(slug, reason);
                }
            }
        }
        info!(
            parsed = report.parsed,
            failed = report.parse_failures.len(),
            chunks = chunks.len(),
            "parsed transcripts"
        );
        Ok(chunks)
    }

    /// Parses, embeds and upserts the entries picked by `mode`, recording every outcome.
    ///
    /// `embedded` marks are only written when `dry_run` is false.
    pub fn ingest(
        &self,
        tracker: &mut StatusTracker,
        mode: IngestMode,
        embedder: &dyn Embedder,
        index: &dyn VectorIndex,
        dry_run: bool,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::start(mode.as_str(), dry_run);
        let slugs = select_slugs(tracker, mode);
        info!(mode = mode.as_str(), selected = slugs.len(), dry_run, "starting ingest");

        let chunks = self.prepare(tracker, &slugs, &mut report)?;
        let mut processor = ChunkProcessor::new(chunks, self.processor.clone());
        processor.embed(embedder);
        processor.upsert(index, dry_run);
        report.processor = processor.get_report();

        if !dry_run {
            for slug in &report.processor.failed_slugs {
                let reason = processor.failure_reason(slug).unwrap_or("chunk processing failed");
                tracker.mark_failure(slug, Step::Embedded, reason)?;
            }
            for slug in &report.processor.successful_slugs {
                tracker.mark_success(slug, Step::Embedded)?;
            }
        }
        tracker.save()?;

        report.runtime_seconds = start.elapsed().as_secs_f64();
        info!(
            succeeded = report.processor.successful_slugs.len(),
            failed = report.processor.failed_slugs.len(),
            seconds = report.runtime_seconds,
            "ingest complete"
        );
        Ok(report)
    }

    /// Re-parses every embedded transcript and resubmits chunk metadata.
    ///
    /// Parsing happens before any await so the worker pool never blocks the runtime.
    pub fn prepare_refresh(&self, tracker: &mut StatusTracker, dry_run: bool) -> Result<(RunReport, ChunkProcessor)> {
        let mut report = RunReport::start("refresh", dry_run);
        let slugs = tracker.filter_for(Step::Embedded, true);
        let chunks = self.prepare(tracker, &slugs, &mut report)?;
        tracker.save()?;
        Ok((report, ChunkProcessor::new(chunks, self.processor.clone())))
    }
}

/// Runs the metadata refresh prepared by [`Pipeline::prepare_refresh`].
pub async fn refresh<M: MetadataIndex>(
    mut report: RunReport,
    processor: &ChunkProcessor,
    client: &M,
    batch_size: usize,
) -> Result<RunReport> {
    let start = Instant::now();
    let summary = processor
        .refresh_metadata_async(client, report.dry_run, batch_size)
        .await?;
    report.refresh_failures = Some(summary.failures.len());
    report.processor = processor.get_report();
    report.runtime_seconds = start.elapsed().as_secs_f64();
    Ok(report)
}
