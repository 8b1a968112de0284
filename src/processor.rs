//! Embed, upsert and metadata-refresh stages over one run's chunk list.
//!
//! Failures are isolated per batch (or per request for the refresh) and folded into
//! slug-level outcomes; nothing here aborts the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedder::Embedder;
use crate::index::{IndexRecord, MetadataIndex, VectorIndex};
use crate::model::TranscriptChunk;
use crate::rate_limit::RateLimiter;
use crate::report::{write_json_artifact, PipelineReport, ARTIFACT_TS_FORMAT};

/// Cumulative token ceiling for one embedding request.
pub const EMBED_BATCH_TOKEN_LIMIT: usize = 7500;
/// Input count ceiling for one embedding request.
pub const EMBED_BATCH_MAX_ITEMS: usize = 2048;
/// Vectors per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 100;
/// Metadata updates allowed per refresh period.
pub const REFRESH_RATE: u32 = 100;

/// Tunables for [`ChunkProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Token budget per embedding batch.
    pub embed_token_budget: usize,
    /// Item cap per embedding batch.
    pub max_embed_items: usize,
    /// Item count per upsert batch.
    pub upsert_batch_size: usize,
    /// Metadata updates per `refresh_period`.
    pub refresh_rate: u32,
    /// Window for `refresh_rate`.
    pub refresh_period: Duration,
    /// Where failure logs are written.
    pub log_dir: PathBuf,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            embed_token_budget: EMBED_BATCH_TOKEN_LIMIT,
            max_embed_items: EMBED_BATCH_MAX_ITEMS,
            upsert_batch_size: UPSERT_BATCH_SIZE,
            refresh_rate: REFRESH_RATE,
            refresh_period: Duration::from_secs(1),
            log_dir: PathBuf::from("data/logs"),
        }
    }
}

/// A networked embedding or indexing call that failed for a whole batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchTransportError {
    /// Embedding request failed or returned the wrong number of vectors.
    #[error("embedding batch of {size} chunks failed: {reason}")]
    Embed {
        /// Chunks in the batch.
        size: usize,
        /// Collaborator error text.
        reason: String,
    },
    /// Upsert request failed.
    #[error("upsert batch of {size} vectors failed: {reason}")]
    Upsert {
        /// Vectors in the batch.
        size: usize,
        /// Collaborator error text.
        reason: String,
    },
}

/// One failed metadata update, as written to the failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFailure {
    /// Chunk id.
    pub id: String,
    /// HTTP status, `0` for transport errors.
    pub status: u16,
    /// Response body or error text.
    pub reason: String,
}

/// Outcome of [`ChunkProcessor::refresh_metadata_async`].
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    /// Updates submitted (or skipped by a dry run).
    pub attempted: usize,
    /// Individual update failures.
    pub failures: Vec<MetadataFailure>,
    /// Failure log path, when any failures were written.
    pub failure_log: Option<PathBuf>,
    /// Wall time.
    pub seconds: f64,
}

/// Drives one run's chunks through the embedding and indexing collaborators.
pub struct ChunkProcessor {
    chunks: Vec<TranscriptChunk>,
    slugs: Vec<String>,
    embeddings: Vec<Option<Vec<f32>>>,
    chunk_failed: Vec<bool>,
    upserted: usize,
    touched: BTreeSet<String>,
    failed: BTreeSet<String>,
    failure_reasons: BTreeMap<String, String>,
    report: PipelineReport,
    config: ProcessorConfig,
}

impl ChunkProcessor {
    /// Takes ownership of the chunks produced by this run's parses.
    pub fn new(chunks: Vec<TranscriptChunk>, config: ProcessorConfig) -> Self {
        let len = chunks.len();
        let slugs = chunks.iter().map(TranscriptChunk::transcript_slug).collect();
        Self {
            chunks,
            slugs,
            embeddings: vec![None; len],
            chunk_failed: vec![false; len],
            upserted: 0,
            touched: BTreeSet::new(),
            failed: BTreeSet::new(),
            failure_reasons: BTreeMap::new(),
            report: PipelineReport::default(),
            config,
        }
    }

    /// Chunks under management, in emission order.
    pub fn chunks(&self) -> &[TranscriptChunk] {
        &self.chunks
    }

    /// Embedding for the chunk at `index`, if its batch succeeded.
    pub fn embedding(&self, index: usize) -> Option<&[f32]> {
        self.embeddings.get(index)?.as_deref()
    }

    /// First recorded failure for `slug`.
    pub fn failure_reason(&self, slug: &str) -> Option<&str> {
        self.failure_reasons.get(slug).map(String::as_str)
    }

    /// Embeds every chunk in token-budgeted batches.
    pub fn embed(&mut self, embedder: &dyn Embedder) {
        self.report.embed_started_at = Some(Utc::now().to_rfc3339());
        let start = Instant::now();

        let batches = self.token_batches();
        info!(
            chunks = self.chunks.len(),
            batches = batches.len(),
            "embedding chunks"
        );
        for batch in batches {
            let texts: Vec<&str> = batch.iter().map(|&i| self.chunks[i].text.as_str()).collect();
            let result = embedder.embed_batch(&texts);
            drop(texts);
            let outcome = match result {
                Ok(vectors) if vectors.len() == batch.len() => Ok(vectors),
                Ok(vectors) => Err(format!(
                    "expected {} embeddings, received {}",
                    batch.len(),
                    vectors.len()
                )),
                Err(err) => Err(format!("{err:#}")),
            };
            match outcome {
                Ok(vectors) => {
                    for (&i, vector) in batch.iter().zip(vectors) {
                        self.embeddings[i] = Some(vector);
                        self.touched.insert(self.slugs[i].clone());
                    }
                }
                Err(reason) => {
                    let err = BatchTransportError::Embed {
                        size: batch.len(),
                        reason,
                    };
                    warn!(error = %err, "embedding batch failed");
                    let message = err.to_string();
                    for &i in &batch {
                        self.fail_chunk(i, &message);
                    }
                }
            }
        }
        self.report.embed_seconds = Some(start.elapsed().as_secs_f64());
    }

    /// Groups chunk indices under the token budget and item cap. Chunks that exceed the
    /// budget on their own are failed here and never batched.
    fn token_batches(&mut self) -> Vec<Vec<usize>> {
        let budget = self.config.embed_token_budget;
        let max_items = self.config.max_embed_items.max(1);
        let mut batches = Vec::new();
        let mut batch = Vec::new();
        let mut batch_tokens = 0usize;
        for i in 0..self.chunks.len() {
            let tokens = self.chunks[i].token_len();
            if tokens > budget {
                warn!(
                    chunk_id = %self.chunks[i].chunk_id,
                    tokens,
                    budget,
                    "chunk exceeds embedding budget, skipping"
                );
                let reason = format!("chunk {} has {tokens} tokens", self.chunks[i].chunk_id);
                self.fail_chunk(i, &reason);
                continue;
            }
            if !batch.is_empty() && (batch_tokens + tokens > budget || batch.len() == max_items) {
                batches.push(std::mem::take(&mut batch));
                batch_tokens = 0;
            }
            batch.push(i);
            batch_tokens += tokens;
        }
        if !batch.is_empty() {
            batches.push(batch);
        }
        batches
    }

    /// Upserts embedded chunks in fixed-size batches of the original chunk order.
    pub fn upsert(&mut self, index: &dyn VectorIndex, dry_run: bool) {
        self.report.upsert_started_at = Some(Utc::now().to_rfc3339());
        let start = Instant::now();
        let batch_size = self.config.upsert_batch_size.max(1);

        for offset in (0..self.chunks.len()).step_by(batch_size) {
            let end = (offset + batch_size).min(self.chunks.len());
            let members: Vec<usize> = (offset..end)
                .filter(|&i| self.embeddings[i].is_some())
                .collect();
            if members.is_empty() {
                continue;
            }
            let outcome = if dry_run {
                debug!(vectors = members.len(), "dry run, skipping upsert");
                Ok(())
            } else {
                let records: Vec<IndexRecord<'_>> = members
                    .iter()
                    .filter_map(|&i| {
                        let values = self.embeddings[i].as_deref()?;
                        Some(IndexRecord {
                            id: &self.chunks[i].chunk_id,
                            values,
                            metadata: self.chunks[i].metadata(),
                        })
                    })
                    .collect();
                index.upsert(&records)
            };
            match outcome {
                Ok(()) => {
                    self.upserted += members.len();
                    for &i in &members {
                        self.touched.insert(self.slugs[i].clone());
                    }
                }
                Err(err) => {
                    let err = BatchTransportError::Upsert {
                        size: members.len(),
                        reason: format!("{err:#}"),
                    };
                    warn!(error = %err, "upsert batch failed");
                    let message = err.to_string();
                    for &i in &members {
                        self.fail_chunk(i, &message);
                    }
                }
            }
        }
        self.report.upsert_seconds = Some(start.elapsed().as_secs_f64());
    }

    /// Re-submits metadata for every chunk without touching vectors.
    ///
    /// Requests go out in groups of `batch_size` awaited together, each first taking a
    /// token from the limiter. Failures are written to
    /// `{log_dir}/failed_metadata_refresh_{ts}.json`.
    pub async fn refresh_metadata_async<M: MetadataIndex>(
        &self,
        client: &M,
        dry_run: bool,
        batch_size: usize,
    ) -> Result<RefreshSummary> {
        let start = Instant::now();
        let limiter = RateLimiter::new(self.config.refresh_rate, self.config.refresh_period);
        let mut summary = RefreshSummary::default();

        for group in self.chunks.chunks(batch_size.max(1)) {
            let outcomes = join_all(group.iter().map(|chunk| {
                let limiter = limiter.as_ref();
                async move {
                    if let Some(limiter) = limiter {
                        limiter.acquire().await;
                    }
                    if dry_run {
                        debug!(chunk_id = %chunk.chunk_id, "dry run, skipping metadata update");
                        return None;
                    }
                    let metadata = chunk.metadata();
                    match client.update_metadata(&chunk.chunk_id, &metadata).await {
                        Ok(()) => None,
                        Err(err) => {
                            warn!(chunk_id = %chunk.chunk_id, status = err.status, "metadata update failed");
                            Some(MetadataFailure {
                                id: chunk.chunk_id.clone(),
                                status: err.status,
                                reason: err.reason,
                            })
                        }
                    }
                }
            }))
            .await;
            summary.attempted += group.len();
            summary.failures.extend(outcomes.into_iter().flatten());
        }

        if !summary.failures.is_empty() {
            let name = format!(
                "failed_metadata_refresh_{}.json",
                Utc::now().format(ARTIFACT_TS_FORMAT)
            );
            let path = write_json_artifact(&self.config.log_dir, &name, &summary.failures)?;
            warn!(
                failures = summary.failures.len(),
                path = %path.display(),
                "saved metadata refresh failures"
            );
            summary.failure_log = Some(path);
        }
        summary.seconds = start.elapsed().as_secs_f64();
        info!(
            attempted = summary.attempted,
            failed = summary.failures.len(),
            seconds = summary.seconds,
            "metadata refresh complete"
        );
        Ok(summary)
    }

    /// Counters plus disjoint succeeded/failed slug sets.
    pub fn get_report(&self) -> PipelineReport {
        let mut report = self.report.clone();
        report.total_chunks = self.chunks.len();
        report.embedded_chunks = self.embeddings.iter().filter(|e| e.is_some()).count();
        report.upserted_chunks = self.upserted;
        report.failed_chunks = self.chunk_failed.iter().filter(|&&f| f).count();
        report.failed_slugs = self.failed.clone();
        report.successful_slugs = self.touched.difference(&self.failed).cloned().collect();
        report
    }

    fn fail_chunk(&mut self, index: usize, reason: &str) {
        self.chunk_failed[index] = true;
        let slug = &self.slugs[index];
        self.failed.insert(slug.clone());
        self.failure_reasons
            .entry(slug.clone())
            .or_insert_with(|| reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MetadataUpdateError;
    use crate::model::{ChunkMetadata, Section};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn chunk(company: &str, n: usize, start: usize, end: usize) -> TranscriptChunk {
        TranscriptChunk {
            chunk_id: format!("{company}-q1-2024-prepared_remarks-{n}"),
            url: format!("https://example.com/{company}-q1-2024-earnings-call-transcript/"),
            section: Section::PreparedRemarks,
            company: company.into(),
            quarter: "q1".into(),
            year: 2024,
            call_ts: "2024-02-01T17:00:00-05:00".into(),
            text: format!("chunk {n}"),
            snippet: None,
            primary_speakers: Vec::new(),
            participants: Vec::new(),
            start_token: start,
            end_token: end,
        }
    }

    #[derive(Default)]
    struct FakeEmbedder {
        batches: Mutex<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    impl Embedder for FakeEmbedder {
        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(inputs.len());
            if self.fail_on_call == Some(batches.len() - 1) {
                anyhow::bail!("503 service unavailable");
            }
            Ok(inputs.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        batches: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl VectorIndex for FakeIndex {
        fn upsert(&self, records: &[IndexRecord<'_>]) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push(records.iter().map(|r| r.id.to_string()).collect());
            anyhow::ensure!(!self.fail, "index unavailable");
            Ok(())
        }
    }

    struct FakeMetadataIndex {
        reject: HashSet<String>,
    }

    impl MetadataIndex for FakeMetadataIndex {
        async fn update_metadata(
            &self,
            id: &str,
            _metadata: &ChunkMetadata,
        ) -> Result<(), MetadataUpdateError> {
            if self.reject.contains(id) {
                return Err(MetadataUpdateError {
                    status: 404,
                    reason: "vector not found".into(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn oversize_chunk_is_failed_and_never_batched() {
        let chunks = vec![chunk("aapl", 0, 0, 100), chunk("aapl", 1, 100, 9000), chunk("aapl", 2, 9000, 9050)];
        let mut processor = ChunkProcessor::new(chunks, ProcessorConfig::default());
        let embedder = FakeEmbedder::default();
        processor.embed(&embedder);

        assert_eq!(*embedder.batches.lock().unwrap(), vec![2]);
        assert!(processor.embedding(0).is_some());
        assert!(processor.embedding(1).is_none());
        assert!(processor.embedding(2).is_some());
        let report = processor.get_report();
        assert!(report.failed_slugs.contains("aapl-q1-2024"));
        assert!(report.successful_slugs.is_empty());
        assert_eq!(report.failed_chunks, 1);
    }

    #[test]
    fn batches_respect_budget_and_item_cap() {
        let chunks: Vec<_> = (0..5).map(|n| chunk("msft", n, n * 40, (n + 1) * 40)).collect();
        let config = ProcessorConfig {
            embed_token_budget: 100,
            max_embed_items: 3,
            ..ProcessorConfig::default()
        };
        let mut processor = ChunkProcessor::new(chunks, config);
        let embedder = FakeEmbedder::default();
        processor.embed(&embedder);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![2, 2, 1]);

        let chunks: Vec<_> = (0..5).map(|n| chunk("msft", n, n, n + 1)).collect();
        let config = ProcessorConfig {
            max_embed_items: 3,
            ..ProcessorConfig::default()
        };
        let mut processor = ChunkProcessor::new(chunks, config);
        let embedder = FakeEmbedder::default();
        processor.embed(&embedder);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![3, 2]);
    }

    #[test]
    fn failed_embed_batch_leaves_later_batches_alone() {
        let chunks = vec![chunk("aapl", 0, 0, 5000), chunk("msft", 0, 0, 5000)];
        let mut processor = ChunkProcessor::new(chunks, ProcessorConfig::default());
        let embedder = FakeEmbedder {
            fail_on_call: Some(0),
            ..FakeEmbedder::default()
        };
        processor.embed(&embedder);

        let report = processor.get_report();
        assert_eq!(report.failed_slugs.into_iter().collect::<Vec<_>>(), vec!["aapl-q1-2024"]);
        assert_eq!(report.successful_slugs.into_iter().collect::<Vec<_>>(), vec!["msft-q1-2024"]);
        assert!(processor
            .failure_reason("aapl-q1-2024")
            .unwrap()
            .contains("503 service unavailable"));
    }

    #[test]
    fn upsert_pairs_embeddings_and_skips_failed_chunks() {
        let chunks = vec![chunk("aapl", 0, 0, 100), chunk("aapl", 1, 100, 9000), chunk("aapl", 2, 9000, 9050)];
        let config = ProcessorConfig {
            upsert_batch_size: 2,
            ..ProcessorConfig::default()
        };
        let mut processor = ChunkProcessor::new(chunks, config);
        processor.embed(&FakeEmbedder::default());
        let index = FakeIndex::default();
        processor.upsert(&index, false);

        assert_eq!(
            *index.batches.lock().unwrap(),
            vec![
                vec!["aapl-q1-2024-prepared_remarks-0".to_string()],
                vec!["aapl-q1-2024-prepared_remarks-2".to_string()],
            ]
        );
        assert_eq!(processor.get_report().upserted_chunks, 2);
    }

    #[test]
    fn dry_run_upsert_records_success_without_calls() {
        let chunks = vec![chunk("nvda", 0, 0, 10)];
        let mut processor = ChunkProcessor::new(chunks, ProcessorConfig::default());
        processor.embed(&FakeEmbedder::default());
        let index = FakeIndex {
            fail: true,
            ..FakeIndex::default()
        };
        processor.upsert(&index, true);

        assert!(index.batches.lock().unwrap().is_empty());
        let report = processor.get_report();
        assert!(report.successful_slugs.contains("nvda-q1-2024"));
        assert_eq!(report.upserted_chunks, 1);
    }

    #[test]
    fn upsert_failure_moves_slug_to_failed() {
        let chunks = vec![chunk("nvda", 0, 0, 10)];
        let mut processor = ChunkProcessor::new(chunks, ProcessorConfig::default());
        processor.embed(&FakeEmbedder::default());
        processor.upsert(
            &FakeIndex {
                fail: true,
                ..FakeIndex::default()
            },
            false,
        );
        let report = processor.get_report();
        assert!(report.failed_slugs.contains("nvda-q1-2024"));
        assert!(report.successful_slugs.is_empty());
    }

    #[tokio::test]
    async fn refresh_collects_failures_into_log() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<_> = (0..5).map(|n| chunk("amzn", n, n, n + 1)).collect();
        let config = ProcessorConfig {
            log_dir: dir.path().to_path_buf(),
            ..ProcessorConfig::default()
        };
        let processor = ChunkProcessor::new(chunks, config);
        let client = FakeMetadataIndex {
            reject: HashSet::from(["amzn-q1-2024-prepared_remarks-3".to_string()]),
        };
        let summary = processor.refresh_metadata_async(&client, false, 2).await.unwrap();

        assert_eq!(summary.attempted, 5);
        assert_eq!(
            summary.failures,
            vec![MetadataFailure {
                id: "amzn-q1-2024-prepared_remarks-3".into(),
                status: 404,
                reason: "vector not found".into(),
            }]
        );
        let path = summary.failure_log.unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("failed_metadata_refresh_"));
        let logged: Vec<MetadataFailure> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(logged, summary.failures);
    }

    #[tokio::test]
    async fn dry_run_refresh_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProcessorConfig {
            log_dir: dir.path().join("logs"),
            ..ProcessorConfig::default()
        };
        let processor = ChunkProcessor::new(vec![chunk("amzn", 0, 0, 1)], config);
        let client = FakeMetadataIndex {
            reject: HashSet::from(["amzn-q1-2024-prepared_remarks-0".to_string()]),
        };
        let summary = processor.refresh_metadata_async(&client, true, 100).await.unwrap();
        assert!(summary.failures.is_empty());
        assert!(!dir.path().join("logs").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_is_paced_by_the_limiter() {
        let chunks: Vec<_> = (0..6).map(|n| chunk("amzn", n, n, n + 1)).collect();
        let config = ProcessorConfig {
            refresh_rate: 2,
            refresh_period: Duration::from_secs(1),
            ..ProcessorConfig::default()
        };
        let processor = ChunkProcessor::new(chunks, config);
        let client = FakeMetadataIndex {
            reject: HashSet::new(),
        };
        let start = tokio::time::Instant::now();
        processor.refresh_metadata_async(&client, false, 6).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1990));
    }
}
