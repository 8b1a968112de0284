use anyhow::{Context, Result};
use clap::Parser;
use earnscrawl::config::{self, OpenAiArgs, ParseArgs, PathArgs, PineconeArgs, ProcessorArgs};
use earnscrawl::{
    logging, AnomalyLog, IngestMode, LocalStorage, OpenAiEmbedder, PineconeIndex,
    Pipeline, StatusTracker, TranscriptParser,
};

#[derive(Parser, Debug)]
#[command(
    name = "earnscrawl-ingest",
    about = "Parse stored transcripts, embed their chunks and upsert them into the index"
)]
struct IngestCli {
    /// Only pick up entries whose last failure was while parsing or embedding
    #[arg(long, default_value_t = false)]
    retry: bool,

    /// Embed but skip upserts and embedded marks
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    paths: PathArgs,

    #[command(flatten)]
    parse: ParseArgs,

    #[command(flatten)]
    processor: ProcessorArgs,

    #[command(flatten)]
    openai: OpenAiArgs,

    #[command(flatten)]
    pinecone: PineconeArgs,
}

fn main() -> Result<()> {
    config::load_env();
    logging::init();
    let cli = IngestCli::parse();

    let mut tracker = StatusTracker::open(&cli.paths.manifest, true)
        .with_context(|| format!("failed to open manifest {:?}", cli.paths.manifest))?;
    let anomalies = AnomalyLog::open(&cli.paths.anomaly_log)
        .with_context(|| format!("failed to open {:?}", cli.paths.anomaly_log))?;
    let counter = cli.parse.token_counter()?;
    let parser = TranscriptParser::new(counter.as_ref(), &anomalies)
        .with_snippet_chars(cli.parse.snippet_chars);
    let storage = LocalStorage::new(&cli.paths.data_root);

    let embedder = OpenAiEmbedder::new(cli.openai.to_config()?)?;
    let index = PineconeIndex::new(&cli.pinecone.to_config()?)?;

    let pipeline = Pipeline::new(
        parser,
        &storage,
        cli.processor.to_config(cli.paths.log_dir.clone()),
        cli.parse.workers(),
    );
    let mode = if cli.retry {
        IngestMode::Retry
    } else {
        IngestMode::Pending
    };
    let report = pipeline.ingest(&mut tracker, mode, &embedder, &index, cli.dry_run)?;
    let path = report.save(&cli.paths.log_dir)?;

    println!(
        "{} run: {} selected, {} parsed, {} parse failures, {} succeeded, {} failed ({:.1}s)",
        report.mode,
        report.selected,
        report.parsed,
        report.parse_failures.len(),
        report.processor.successful_slugs.len(),
        report.processor.failed_slugs.len(),
        report.runtime_seconds
    );
    for (slug, reason) in &report.parse_failures {
        println!("  parse failed {slug}: {reason}");
    }
    for slug in &report.processor.failed_slugs {
        println!("  embed failed {slug}");
    }
    println!("report saved to {}", path.display());
    Ok(())
}
