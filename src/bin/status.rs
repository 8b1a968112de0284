use anyhow::{Context, Result};
use clap::Parser;
use earnscrawl::config::{self, PathArgs};
use earnscrawl::pipeline::{select_slugs, IngestMode};
use earnscrawl::{logging, StatusTracker};

#[derive(Parser, Debug)]
#[command(name = "earnscrawl-status", about = "Summarize the transcript manifest")]
struct StatusCli {
    /// Also list every entry carrying a failure annotation
    #[arg(long, default_value_t = false)]
    failures: bool,

    #[command(flatten)]
    paths: PathArgs,
}

fn main() -> Result<()> {
    config::load_env();
    logging::init();
    let cli = StatusCli::parse();
    let tracker = StatusTracker::open(&cli.paths.manifest, false)
        .with_context(|| format!("failed to open manifest {:?}", cli.paths.manifest))?;

    let summary = tracker.summary();
    println!("manifest: {}", tracker.path().display());
    println!("  transcripts: {}", summary.total);
    println!("  html saved:  {}", summary.html_saved);
    println!("  parsed:      {}", summary.parsed);
    println!("  embedded:    {}", summary.embedded);
    println!("  failed:      {}", summary.failed);
    println!(
        "  pending ingest: {}, retryable: {}",
        select_slugs(&tracker, IngestMode::Pending).len(),
        select_slugs(&tracker, IngestMode::Retry).len()
    );

    let inconsistent = tracker.inconsistent_slugs();
    if !inconsistent.is_empty() {
        println!("embedded without parsed:");
        for slug in inconsistent {
            println!("  {slug}");
        }
    }

    if cli.failures {
        for (slug, entry) in tracker.entries() {
            if let Some(annotation) = &entry.failed_at_step {
                println!("  {slug}: {annotation}");
            }
        }
    }
    Ok(())
}
