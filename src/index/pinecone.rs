//! Pinecone data-plane clients: blocking upserts and async metadata updates.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use super::{IndexRecord, MetadataIndex, MetadataUpdateError, VectorIndex};
use crate::model::ChunkMetadata;

const API_VERSION: &str = "2025-01";

/// Index host and credentials.
#[derive(Debug, Clone)]
pub struct PineconeConfig {
    /// Value for the `Api-Key` header.
    pub api_key: String,
    /// Index host URL, e.g. `https://transcripts-xxxx.svc.aped-4627-b74a.pinecone.io`.
    pub host: String,
    /// Optional namespace for every request.
    pub namespace: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl PineconeConfig {
    fn headers(&self) -> Result<HeaderMap> {
        anyhow::ensure!(!self.api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(
            self.host.starts_with("http://") || self.host.starts_with("https://"),
            "Pinecone host must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(self.api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.host.trim_end_matches('/'), path)
    }
}

/// Blocking client used by the sequential upsert stage.
pub struct PineconeIndex {
    client: reqwest::blocking::Client,
    upsert_url: String,
    namespace: Option<String>,
}

impl PineconeIndex {
    /// Builds a blocking index client.
    pub fn new(config: &PineconeConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .default_headers(config.headers()?)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            upsert_url: config.endpoint("vectors/upsert"),
            namespace: config.namespace.clone(),
        })
    }
}

impl VectorIndex for PineconeIndex {
    fn upsert(&self, records: &[IndexRecord<'_>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let request = UpsertRequest {
            vectors: records,
            namespace: self.namespace.as_deref(),
        };
        let resp = self
            .client
            .post(&self.upsert_url)
            .json(&request)
            .send()
            .context("Pinecone upsert request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("Pinecone upsert failed ({}): {}", status, body);
        }
        Ok(())
    }
}

/// Async client used by the rate-limited metadata refresh.
#[derive(Clone)]
pub struct PineconeMetadataClient {
    client: reqwest::Client,
    update_url: String,
    namespace: Option<String>,
}

impl PineconeMetadataClient {
    /// Builds an async metadata client.
    pub fn new(config: &PineconeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(config.headers()?)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            update_url: config.endpoint("vectors/update"),
            namespace: config.namespace.clone(),
        })
    }
}

impl MetadataIndex for PineconeMetadataClient {
    async fn update_metadata(
        &self,
        id: &str,
        metadata: &ChunkMetadata,
    ) -> Result<(), MetadataUpdateError> {
        let request = UpdateRequest {
            id,
            set_metadata: metadata,
            namespace: self.namespace.as_deref(),
        };
        let resp = self
            .client
            .post(&self.update_url)
            .json(&request)
            .send()
            .await
            .map_err(|err| MetadataUpdateError {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                reason: err.to_string(),
            })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let reason = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        Err(MetadataUpdateError {
            status: status.as_u16(),
            reason,
        })
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexRecord<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id: &'a str,
    set_metadata: &'a ChunkMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> PineconeConfig {
        PineconeConfig {
            api_key: "key".into(),
            host: host.into(),
            namespace: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoints_join_host_and_path() {
        assert_eq!(
            config("https://idx.pinecone.io/").endpoint("vectors/update"),
            "https://idx.pinecone.io/vectors/update"
        );
    }

    #[test]
    fn rejects_non_http_hosts() {
        assert!(config("idx.pinecone.io").headers().is_err());
        assert!(config("https://idx.pinecone.io").headers().is_ok());
    }
}
