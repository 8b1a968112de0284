use anyhow::{Context, Result};
use clap::Parser;
use earnscrawl::config::{self, ParseArgs, PathArgs, PineconeArgs, ProcessorArgs};
use earnscrawl::pipeline;
use earnscrawl::{
    logging, AnomalyLog, LocalStorage, PineconeMetadataClient, Pipeline,
    StatusTracker, TranscriptParser,
};

#[derive(Parser, Debug)]
#[command(
    name = "earnscrawl-refresh",
    about = "Re-parse embedded transcripts and resubmit chunk metadata without re-embedding"
)]
struct RefreshCli {
    /// Updates awaited together per submission group
    #[arg(long, env = "EARNSCRAWL_REFRESH_BATCH", default_value_t = 100)]
    batch_size: usize,

    /// Log the updates without sending them
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    paths: PathArgs,

    #[command(flatten)]
    parse: ParseArgs,

    #[command(flatten)]
    processor: ProcessorArgs,

    #[command(flatten)]
    pinecone: PineconeArgs,
}

fn main() -> Result<()> {
    config::load_env();
    logging::init();
    let cli = RefreshCli::parse();

    let mut tracker = StatusTracker::open(&cli.paths.manifest, true)
        .with_context(|| format!("failed to open manifest {:?}", cli.paths.manifest))?;
    let anomalies = AnomalyLog::open(&cli.paths.anomaly_log)
        .with_context(|| format!("failed to open {:?}", cli.paths.anomaly_log))?;
    let counter = cli.parse.token_counter()?;
    let parser = TranscriptParser::new(counter.as_ref(), &anomalies)
        .with_snippet_chars(cli.parse.snippet_chars);
    let storage = LocalStorage::new(&cli.paths.data_root);
    let client = PineconeMetadataClient::new(&cli.pinecone.to_config()?)?;

    let pipeline = Pipeline::new(
        parser,
        &storage,
        cli.processor.to_config(cli.paths.log_dir.clone()),
        cli.parse.workers(),
    );
    let (report, processor) = pipeline.prepare_refresh(&mut tracker, cli.dry_run)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let report = runtime.block_on(pipeline::refresh(report, &processor, &client, cli.batch_size))?;
    let path = report.save(&cli.paths.log_dir)?;

    println!(
        "refreshed metadata for {} chunks across {} transcripts: {} failures ({:.1}s)",
        report.processor.total_chunks,
        report.parsed,
        report.refresh_failures.unwrap_or(0),
        report.runtime_seconds
    );
    println!("report saved to {}", path.display());
    Ok(())
}
