//! Command-line and environment configuration shared by the binaries.
//!
//! Every flag has an `EARNSCRAWL_*` fallback; collaborator secrets use the names the
//! providers document (`OPENAI_API_KEY`, `PINECONE_API_KEY`, `PINECONE_HOST`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use url::Url;

use crate::embedder::openai::OpenAiConfig;
use crate::index::pinecone::PineconeConfig;
use crate::processor::{
    ProcessorConfig, EMBED_BATCH_MAX_ITEMS, EMBED_BATCH_TOKEN_LIMIT, REFRESH_RATE,
    UPSERT_BATCH_SIZE,
};
use crate::tokenizer::{TokenCounter, TokenizerKind};

/// Loads `.env.local` then `.env`. Values already present in the environment win, and
/// `.env.local` wins over `.env`.
///
/// Call before [`crate::logging::init`] so `RUST_LOG` from an env file applies.
pub fn load_env() {
    for file in [".env.local", ".env"] {
        match dotenvy::from_filename(file) {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded env file"),
            Err(err) if err.not_found() => {}
            Err(err) => tracing::warn!(file, error = %err, "ignoring unreadable env file"),
        }
    }
}

/// On-disk locations for HTML, the manifest and run artifacts.
#[derive(Args, Debug, Clone)]
pub struct PathArgs {
    /// Root directory for stored HTML
    #[arg(long, env = "EARNSCRAWL_DATA_ROOT", default_value = "data")]
    pub data_root: PathBuf,

    /// Manifest JSON file
    #[arg(long, env = "EARNSCRAWL_MANIFEST", default_value = "data/status/manifest.json")]
    pub manifest: PathBuf,

    /// Directory for run reports and failure logs
    #[arg(long, env = "EARNSCRAWL_LOG_DIR", default_value = "data/logs")]
    pub log_dir: PathBuf,

    /// Deduplicated log of unrecognized officer titles
    #[arg(
        long,
        env = "EARNSCRAWL_ANOMALY_LOG",
        default_value = "data/logs/unhandled_titles.txt"
    )]
    pub anomaly_log: PathBuf,
}

/// Parser and worker-pool settings.
#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    /// Token counter for spans and embedding budgets
    #[arg(long, env = "EARNSCRAWL_TOKENIZER", value_enum, default_value_t = TokenizerKind::Cl100k)]
    pub tokenizer: TokenizerKind,

    /// `tokenizer.json` for `--tokenizer hf`
    #[arg(long, env = "EARNSCRAWL_TOKENIZER_FILE")]
    pub tokenizer_file: Option<PathBuf>,

    /// Parse worker threads (0 = available parallelism)
    #[arg(long, env = "EARNSCRAWL_PARSE_WORKERS", default_value_t = 0)]
    pub parse_workers: usize,

    /// Maximum snippet length in characters
    #[arg(long, env = "EARNSCRAWL_SNIPPET_CHARS", default_value_t = crate::text::DEFAULT_SNIPPET_CHARS)]
    pub snippet_chars: usize,
}

impl ParseArgs {
    /// Builds the configured token counter.
    pub fn token_counter(&self) -> Result<Box<dyn TokenCounter>> {
        crate::tokenizer::load(self.tokenizer, self.tokenizer_file.as_deref())
    }

    /// Worker count with `0` resolved to the machine's parallelism.
    pub fn workers(&self) -> usize {
        if self.parse_workers > 0 {
            return self.parse_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Batching and pacing for the chunk processor.
#[derive(Args, Debug, Clone)]
pub struct ProcessorArgs {
    /// Cumulative token budget per embedding request
    #[arg(long, env = "EARNSCRAWL_EMBED_TOKEN_BUDGET", default_value_t = EMBED_BATCH_TOKEN_LIMIT)]
    pub embed_token_budget: usize,

    /// Maximum inputs per embedding request
    #[arg(long, env = "EARNSCRAWL_EMBED_MAX_ITEMS", default_value_t = EMBED_BATCH_MAX_ITEMS)]
    pub embed_max_items: usize,

    /// Vectors per upsert request
    #[arg(long, env = "EARNSCRAWL_UPSERT_BATCH", default_value_t = UPSERT_BATCH_SIZE)]
    pub upsert_batch: usize,

    /// Metadata updates allowed per second during refresh
    #[arg(long, env = "EARNSCRAWL_REFRESH_RATE", default_value_t = REFRESH_RATE)]
    pub refresh_rate: u32,
}

impl ProcessorArgs {
    /// Converts flags into processor settings writing artifacts to `log_dir`.
    pub fn to_config(&self, log_dir: PathBuf) -> ProcessorConfig {
        ProcessorConfig {
            embed_token_budget: self.embed_token_budget,
            max_embed_items: self.embed_max_items,
            upsert_batch_size: self.upsert_batch,
            refresh_rate: self.refresh_rate,
            refresh_period: Duration::from_secs(1),
            log_dir,
        }
    }
}

/// OpenAI embeddings connection.
#[derive(Args, Debug, Clone)]
pub struct OpenAiArgs {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Embedding model
    #[arg(
        long,
        env = "EARNSCRAWL_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub openai_model: String,

    /// API base URL
    #[arg(
        long,
        env = "EARNSCRAWL_OPENAI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Optional output dimension override
    #[arg(long, env = "EARNSCRAWL_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, env = "EARNSCRAWL_OPENAI_TIMEOUT_SECS", default_value_t = 60)]
    pub openai_timeout_secs: u64,

    /// Attempts per request on 429/5xx (1 = no retry)
    #[arg(long, env = "EARNSCRAWL_OPENAI_MAX_ATTEMPTS", default_value_t = 1)]
    pub openai_max_attempts: usize,
}

impl OpenAiArgs {
    /// Builds client settings; fails when the key is missing.
    pub fn to_config(&self) -> Result<OpenAiConfig> {
        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY (or --openai-api-key) is required")?;
        Ok(OpenAiConfig {
            api_key,
            base_url: self.openai_base_url.clone(),
            model: self.openai_model.clone(),
            dimensions: self.openai_dimensions,
            timeout: Duration::from_secs(self.openai_timeout_secs),
            max_attempts: self.openai_max_attempts,
        })
    }
}

/// Pinecone index connection.
#[derive(Args, Debug, Clone)]
pub struct PineconeArgs {
    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    /// Index host URL
    #[arg(long, env = "PINECONE_HOST")]
    pub pinecone_host: Option<String>,

    /// Index namespace
    #[arg(long, env = "EARNSCRAWL_PINECONE_NAMESPACE")]
    pub pinecone_namespace: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "EARNSCRAWL_PINECONE_TIMEOUT_SECS", default_value_t = 30)]
    pub pinecone_timeout_secs: u64,
}

impl PineconeArgs {
    /// Builds client settings; fails when the key or host is missing.
    pub fn to_config(&self) -> Result<PineconeConfig> {
        let api_key = self
            .pinecone_api_key
            .clone()
            .context("PINECONE_API_KEY (or --pinecone-api-key) is required")?;
        let host = self
            .pinecone_host
            .clone()
            .context("PINECONE_HOST (or --pinecone-host) is required")?;
        Ok(PineconeConfig {
            api_key,
            host,
            namespace: self.pinecone_namespace.clone(),
            timeout: Duration::from_secs(self.pinecone_timeout_secs),
        })
    }
}

/// Listing pages and politeness settings for discovery and download.
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Listing pages to scan for transcript links
    #[arg(
        long = "listing",
        env = "EARNSCRAWL_LISTINGS",
        value_delimiter = ',',
        default_value = "https://www.fool.com/earnings-call-transcripts/"
    )]
    pub listings: Vec<Url>,

    /// Milliseconds to wait between transcript downloads
    #[arg(long, env = "EARNSCRAWL_POLITENESS_MS", default_value_t = 1000)]
    pub politeness_ms: u64,

    /// Request timeout in seconds
    #[arg(long, env = "EARNSCRAWL_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub fetch_timeout_secs: u64,

    /// Maximum transcript links kept per listing page
    #[arg(long, env = "EARNSCRAWL_MAX_LINKS_PER_PAGE", default_value_t = 500)]
    pub max_links_per_page: usize,

    /// Skip discovery and only download entries already in the manifest
    #[arg(long, default_value_t = false)]
    pub skip_discovery: bool,
}

impl FetchArgs {
    /// Converts flags into fetcher settings.
    pub fn to_config(&self) -> crate::fetcher::FetchConfig {
        crate::fetcher::FetchConfig {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            delay: Duration::from_millis(self.politeness_ms),
            max_links_per_page: self.max_links_per_page,
            ..crate::fetcher::FetchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        parse: ParseArgs,
        #[command(flatten)]
        processor: ProcessorArgs,
        #[command(flatten)]
        pinecone: PineconeArgs,
    }

    #[test]
    fn processor_flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "test",
            "--embed-token-budget",
            "1000",
            "--upsert-batch",
            "10",
        ])
        .unwrap();
        let config = cli.processor.to_config(PathBuf::from("logs"));
        assert_eq!(config.embed_token_budget, 1000);
        assert_eq!(config.upsert_batch_size, 10);
        assert_eq!(config.refresh_period, Duration::from_secs(1));
    }

    #[test]
    fn tokenizer_defaults_to_cl100k() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        assert_eq!(cli.parse.tokenizer, TokenizerKind::Cl100k);

        let cli = TestCli::try_parse_from(["test", "--tokenizer", "words"]).unwrap();
        assert_eq!(cli.parse.tokenizer, TokenizerKind::Words);
        assert_eq!(cli.parse.token_counter().unwrap().count("one two").unwrap(), 2);
    }

    #[test]
    fn pinecone_host_is_required() {
        let cli = TestCli::try_parse_from([
            "test",
            "--pinecone-api-key",
            "key",
            "--pinecone-host",
            "https://idx.pinecone.io",
        ])
        .unwrap();
        assert_eq!(cli.pinecone.to_config().unwrap().host, "https://idx.pinecone.io");

        let missing = PineconeArgs {
            pinecone_host: None,
            ..cli.pinecone
        };
        assert!(missing.to_config().is_err());
    }
}
