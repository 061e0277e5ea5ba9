// Embeddings module
// Embedding model seam, the Ollama client behind it, and abstract chunking

pub mod chunking;
pub mod ollama;

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, estimate_token_count};
pub use ollama::OllamaClient;

use anyhow::Result;

/// Turns text into fixed-dimension vectors.
///
/// Implementations are shared across request handlers, so they must be
/// callable through `&self` from several tasks at once.
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, returning one vector per input in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier, for logs and status output
    fn model_name(&self) -> &str;
}
