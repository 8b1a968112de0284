//! Embedding collaborators.

pub mod openai;

use anyhow::Result;

/// Turns texts into vectors, one per input, in input order.
pub trait Embedder {
    /// Embeds one request's worth of texts. A returned error fails the whole batch.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;
}
