//! Vector index collaborators.

pub mod pinecone;

use std::future::Future;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

use crate::model::ChunkMetadata;

/// One vector plus metadata, upserted idempotently by `id`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexRecord<'a> {
    /// Chunk id.
    pub id: &'a str,
    /// Embedding values.
    pub values: &'a [f32],
    /// Flattened chunk metadata.
    pub metadata: ChunkMetadata,
}

/// Blocking upsert endpoint.
pub trait VectorIndex {
    /// Upserts one batch. A returned error fails the whole batch.
    fn upsert(&self, records: &[IndexRecord<'_>]) -> Result<()>;
}

/// Why a single metadata update failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("metadata update failed ({status}): {reason}")]
pub struct MetadataUpdateError {
    /// HTTP status, or `0` when the request never produced a response.
    pub status: u16,
    /// Response body or transport error text.
    pub reason: String,
}

/// Async metadata-only update endpoint; never touches vector values.
pub trait MetadataIndex: Sync {
    /// Replaces the metadata stored for `id`.
    fn update_metadata(
        &self,
        id: &str,
        metadata: &ChunkMetadata,
    ) -> impl Future<Output = Result<(), MetadataUpdateError>> + Send;
}
