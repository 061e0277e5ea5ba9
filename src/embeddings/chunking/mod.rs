
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A window of an abstract ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text, words joined by single spaces
    pub content: String,
    /// The index of this chunk within its document
    pub chunk_index: usize,
    /// Word count of the chunk
    pub token_count: usize,
}

/// Configuration for sliding-window chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in words
    pub chunk_size: usize,
    /// Words shared between consecutive windows
    pub overlap: usize,
    /// Windows with this many words or fewer are dropped
    pub min_words: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
            min_words: 20,
        }
    }
}

impl ChunkingConfig {
    /// Distance between consecutive window starts
    #[inline]
    pub fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

/// Split `text` into overlapping word windows.
///
/// A window starts at every multiple of the step below the word count, so the
/// tail of a long text produces shorter trailing windows. Only windows with more
/// than `min_words` words are kept; indices stay dense over the kept windows.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let step = config.step();

    let chunks: Vec<TextChunk> = (0..words.len())
        .step_by(step)
        .filter_map(|start| {
            let end = (start + config.chunk_size).min(words.len());
            let window = words.get(start..end)?;
            (window.len() > config.min_words).then(|| window.join(" "))
        })
        .enumerate()
        .map(|(chunk_index, content)| TextChunk {
            token_count: estimate_token_count(&content),
            content,
            chunk_index,
        })
        .collect();

    debug!(
        "Split {} words into {} chunks (window {}, step {})",
        words.len(),
        chunks.len(),
        config.chunk_size,
        step
    );

    chunks
}

/// Token count as used for chunk bookkeeping: whitespace-separated words
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.split_whitespace().count()
}
