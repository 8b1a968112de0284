//! Transcript discovery and raw HTML download.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::html::{stream_links, transcript_link};
use crate::key::{LocalStorage, TranscriptKey};
use crate::manifest::{StatusTracker, Step};

/// HTTP settings for listing and transcript requests.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Sent as `User-Agent`.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Pause between consecutive transcript downloads.
    pub delay: Duration,
    /// Maximum transcript links kept per listing page.
    pub max_links_per_page: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("earnscrawl/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            delay: Duration::from_millis(1000),
            max_links_per_page: 500,
        }
    }
}

/// Outcome of one download pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    /// Listing pages scanned.
    pub listings: usize,
    /// Transcripts newly added to the manifest.
    pub discovered: usize,
    /// Slugs downloaded and stored.
    pub fetched: Vec<String>,
    /// Download failures keyed by slug.
    pub failed: BTreeMap<String, String>,
}

/// Discovers transcript pages and downloads them into [`LocalStorage`].
pub struct Fetcher {
    client: reqwest::Client,
    storage: LocalStorage,
    config: FetchConfig,
}

impl Fetcher {
    /// Builds the shared HTTP client.
    pub fn new(storage: LocalStorage, config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            storage,
            config,
        })
    }

    /// Scans listing pages and registers every transcript link in the manifest.
    ///
    /// A listing that cannot be read is logged and skipped.
    pub async fn discover(
        &self,
        listings: &[Url],
        tracker: &mut StatusTracker,
        report: &mut FetchReport,
    ) -> Result<()> {
        for listing in listings {
            report.listings += 1;
            let links = match self.listing_links(listing).await {
                Ok(links) => links,
                Err(err) => {
                    warn!(listing = %listing, error = %format!("{err:#}"), "listing scan failed");
                    continue;
                }
            };
            let mut added = 0usize;
            for (key, url) in links {
                if tracker.add(&key, url.as_str())? {
                    added += 1;
                }
            }
            info!(listing = %listing, added, "scanned listing");
            report.discovered += added;
        }
        Ok(())
    }

    async fn listing_links(&self, listing: &Url) -> Result<Vec<(TranscriptKey, Url)>> {
        let response = self
            .client
            .get(listing.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("failed to fetch {listing}"))?;
        let base = response.url().clone();
        let links = stream_links(
            response.bytes_stream(),
            self.config.max_links_per_page,
            move |href| transcript_link(&base, href),
        )
        .await?;
        Ok(links)
    }

    /// Downloads every transcript whose `html_saved` flag is still false.
    pub async fn fetch_pending(
        &self,
        tracker: &mut StatusTracker,
        report: &mut FetchReport,
    ) -> Result<()> {
        let pending = tracker.filter_for(Step::HtmlSaved, false);
        info!(pending = pending.len(), "fetching transcripts");
        for (i, slug) in pending.iter().enumerate() {
            if i > 0 && !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }
            let Some(url) = tracker.url(slug).map(str::to_owned) else {
                continue;
            };
            match self.fetch_one(slug, &url).await {
                Ok(()) => {
                    tracker.mark_success(slug, Step::HtmlSaved)?;
                    report.fetched.push(slug.clone());
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(%slug, %url, error = %reason, "transcript download failed");
                    tracker.mark_failure(slug, Step::HtmlSaved, &reason)?;
                    report.failed.insert(slug.clone(), reason);
                }
            }
        }
        Ok(())
    }

    async fn fetch_one(&self, slug: &str, url: &str) -> Result<()> {
        let key = TranscriptKey::from_slug(slug)?;
        let html = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("failed to fetch {url}"))?
            .text()
            .await
            .context("failed to read response body")?;
        let path = self.storage.write_html(&key, &html)?;
        info!(%slug, path = %path.display(), bytes = html.len(), "saved transcript html");
        Ok(())
    }
}
