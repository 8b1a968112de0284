//! Streaming link discovery built on `lol_html`.

use std::sync::{Arc, Mutex};

use futures_util::{Stream, StreamExt};
use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use thiserror::Error;
use url::Url;

use crate::key::TranscriptKey;

/// Path segment shared by every transcript page.
pub const TRANSCRIPT_PATH_MARKER: &str = "/earnings/call-transcripts/";

/// Streams anchor tags from a body stream, transforming matching `href` values with `transform`.
///
/// The `transform` closure runs for every `href`; returning `Some(T)` keeps the value, `None` skips
/// it. Only accepted entries count against `limit`.
pub async fn stream_links<S, B, T, F>(
    mut body: S,
    limit: usize,
    transform: F,
) -> Result<Vec<T>, HtmlStreamError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
    T: Send + 'static,
    F: Fn(&str) -> Option<T> + Send + Sync + 'static,
{
    if limit == 0 {
        return Ok(Vec::new());
    }

    let values: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
    let values_handle = Arc::clone(&values);

    let handler = element!("a[href]", move |el| {
        let Ok(mut entries) = values_handle.lock() else {
            return Ok(());
        };
        if entries.len() >= limit {
            return Ok(());
        }

        if let Some(href) = el.get_attribute("href") {
            if let Some(mapped) = transform(&href) {
                entries.push(mapped);
            }
        }
        Ok(())
    });

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![handler],
            ..Settings::default()
        },
        NoopSink,
    );

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(HtmlStreamError::Http)?;
        rewriter.write(chunk.as_ref())?;
    }
    rewriter.end()?;

    let collected = Arc::try_unwrap(values)
        .map_err(|_| HtmlStreamError::CollectorInUse)?
        .into_inner()
        .map_err(|_| HtmlStreamError::CollectorPoisoned)?;

    Ok(collected)
}

/// Resolves `href` against `base` and keeps it when it names an earnings-call transcript.
///
/// Query strings and fragments are dropped so the same page discovered from two listings
/// yields one URL.
pub fn transcript_link(base: &Url, href: &str) -> Option<(TranscriptKey, Url)> {
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") || !url.path().contains(TRANSCRIPT_PATH_MARKER) {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    let key = TranscriptKey::from_url(url.as_str()).ok()?;
    Some((key, url))
}

/// Errors surfaced while streaming HTML.
#[derive(Debug, Error)]
pub enum HtmlStreamError {
    /// Reading the response stream failed.
    #[error("http stream error: {0}")]
    Http(#[source] reqwest::Error),
    /// The HTML rewriter encountered malformed markup.
    #[error("html rewrite error: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
    /// Internal buffer still had outstanding references.
    #[error("link collector still in use")]
    CollectorInUse,
    /// Collector mutex was poisoned while draining results.
    #[error("link collector mutex poisoned")]
    CollectorPoisoned,
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}
