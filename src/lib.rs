#![warn(missing_docs)]
//! Core library entry points for the earnscrawl transcript ingestion pipeline.

pub mod anomaly;
pub mod config;
pub mod embedder;
pub mod fetcher;
pub mod html;
pub mod index;
pub mod key;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod processor;
mod rate_limit;
pub mod report;
pub mod text;
pub mod tokenizer;

pub use anomaly::AnomalyLog;
pub use embedder::{openai::OpenAiEmbedder, Embedder};
pub use index::{
    pinecone::{PineconeIndex, PineconeMetadataClient},
    IndexRecord, MetadataIndex, MetadataUpdateError, VectorIndex,
};
pub use key::{KeyError, LocalStorage, TranscriptKey};
pub use manifest::{ManifestEntry, ManifestError, StatusTracker, Step};
pub use model::{ChunkMetadata, Section, Speaker, SpeakerType, TranscriptChunk};
pub use parser::{ParseError, TranscriptParser};
pub use pipeline::{IngestMode, Pipeline};
pub use processor::{BatchTransportError, ChunkProcessor, MetadataFailure, ProcessorConfig};
pub use rate_limit::RateLimiter;
pub use report::{PipelineReport, RunReport};
