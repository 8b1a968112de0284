use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use earnscrawl::config::{self, FetchArgs, PathArgs};
use earnscrawl::fetcher::{FetchReport, Fetcher};
use earnscrawl::report::{write_json_artifact, ARTIFACT_TS_FORMAT};
use earnscrawl::{logging, LocalStorage, StatusTracker};

#[derive(Parser, Debug)]
#[command(
    name = "earnscrawl-fetch",
    about = "Discover earnings-call transcripts and download their HTML"
)]
struct FetchCli {
    #[command(flatten)]
    fetch: FetchArgs,

    #[command(flatten)]
    paths: PathArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    logging::init();
    let cli = FetchCli::parse();

    let mut tracker = StatusTracker::open(&cli.paths.manifest, true)
        .with_context(|| format!("failed to open manifest {:?}", cli.paths.manifest))?;
    let fetcher = Fetcher::new(LocalStorage::new(&cli.paths.data_root), cli.fetch.to_config())?;

    let mut report = FetchReport::default();
    if !cli.fetch.skip_discovery {
        fetcher
            .discover(&cli.fetch.listings, &mut tracker, &mut report)
            .await?;
    }
    fetcher.fetch_pending(&mut tracker, &mut report).await?;
    tracker.save()?;

    let name = format!("fetch_report_{}.json", Utc::now().format(ARTIFACT_TS_FORMAT));
    let path = write_json_artifact(&cli.paths.log_dir, &name, &report)?;
    println!(
        "scanned {} listings, discovered {}, fetched {}, failed {}",
        report.listings,
        report.discovered,
        report.fetched.len(),
        report.failed.len()
    );
    for (slug, reason) in &report.failed {
        println!("  {slug}: {reason}");
    }
    println!("report saved to {}", path.display());
    Ok(())
}
