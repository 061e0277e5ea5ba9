// Indexer module
// Offline stages that turn stored chunks into staged embeddings and a searchable index

pub mod consistency;


use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::EmbeddingPosition;
use crate::database::vector_index::{EmbeddingMatrix, VectorIndex};
use crate::embeddings::Embedder;
use crate::ingest::progress_bar;

pub use consistency::{ConsistencyReport, ConsistencyValidator, PositionMismatch};

/// Result of the embedding stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingStats {
    pub chunks_embedded: usize,
    pub batches: usize,
    pub dimension: usize,
    pub positions_assigned: usize,
}

/// Result of the index building stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub vectors: usize,
    pub dimension: usize,
    /// The first stored vector found itself as the top hit
    pub self_test_passed: bool,
    pub consistency: ConsistencyReport,
}

/// Drives the embed and build-index stages over the chunk store
pub struct Indexer {
    database: Database,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    dimension: usize,
    embeddings_path: PathBuf,
    index_path: PathBuf,
    show_progress: bool,
}

impl Indexer {
    #[inline]
    pub fn new(database: Database, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            database,
            embedder,
            batch_size: (config.ollama.batch_size as usize).max(1),
            dimension: config.ollama.embedding_dimension as usize,
            embeddings_path: config.embeddings_path(),
            index_path: config.index_path(),
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Embed every stored chunk in `chunk_id` order, write the staged
    /// embeddings file and record each chunk's position.
    #[inline]
    pub async fn generate_embeddings(&self) -> Result<EmbeddingStats> {
        let chunks = self
            .database
            .list_chunks_for_embedding()
            .await
            .context("Failed to load chunks for embedding")?;

        if chunks.is_empty() {
            bail!("No chunks to embed; run the chunk stage first");
        }

        info!(
            "Embedding {} chunks with model {} in batches of {}",
            chunks.len(),
            self.embedder.model_name(),
            self.batch_size
        );

        let mut matrix = EmbeddingMatrix::new(self.dimension)
            .context("Invalid embedding dimension in configuration")?;
        let mut positions = Vec::with_capacity(chunks.len());
        let bar = progress_bar(self.show_progress, chunks.len() as u64, "Embedding");
        let mut batches = 0;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.chunk_text.clone()).collect();
            let embedder = Arc::clone(&self.embedder);

            let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
                .await
                .context("Embedding task failed")?
                .with_context(|| format!("Failed to embed batch {}", batches + 1))?;

            if vectors.len() != batch.len() {
                bail!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }

            for (chunk, vector) in batch.iter().zip(&vectors) {
                let position = matrix
                    .push(chunk.chunk_id, vector)
                    .with_context(|| format!("Bad embedding for chunk {}", chunk.chunk_id))?;
                positions.push(EmbeddingPosition {
                    chunk_id: chunk.chunk_id,
                    embedding_index: i64::try_from(position)
                        .context("Embedding position exceeds the store's id range")?,
                });
            }

            batches += 1;
            bar.inc(batch.len() as u64);
            debug!("Embedded batch {} ({} chunks)", batches, batch.len());
        }
        bar.finish_and_clear();

        matrix
            .save(&self.embeddings_path)
            .context("Failed to write staged embeddings")?;

        let positions_assigned = self
            .database
            .assign_embedding_indices(&positions)
            .await
            .context("Failed to record embedding positions")?;

        if let Err(e) = self.database.optimize().await {
            warn!("Failed to optimize chunk store: {}", e);
        }

        info!(
            "Saved {} embeddings of dimension {} to {}",
            matrix.len(),
            matrix.dimension(),
            self.embeddings_path.display()
        );

        Ok(EmbeddingStats {
            chunks_embedded: matrix.len(),
            batches,
            dimension: matrix.dimension(),
            positions_assigned,
        })
    }

    /// Normalize the staged embeddings into a flat index and save it
    #[inline]
    pub async fn build_index(&self) -> Result<IndexStats> {
        let matrix = EmbeddingMatrix::load(&self.embeddings_path).with_context(|| {
            format!(
                "Failed to load staged embeddings from {}; run the embed stage first",
                self.embeddings_path.display()
            )
        })?;

        if matrix.dimension() != self.dimension {
            bail!(
                "Staged embeddings have dimension {}, configuration expects {}",
                matrix.dimension(),
                self.dimension
            );
        }

        info!(
            "Building index from {} embeddings of dimension {}",
            matrix.len(),
            matrix.dimension()
        );
        let index = VectorIndex::from_matrix(&matrix).context("Failed to build index")?;

        let self_test_passed = self_test(&index)?;
        if !self_test_passed {
            warn!("Index self-test failed: the first vector is not its own nearest neighbour");
        }

        index
            .save(&self.index_path)
            .context("Failed to write index file")?;
        info!(
            "Saved index with {} vectors to {}",
            index.len(),
            self.index_path.display()
        );

        let consistency = ConsistencyValidator::new(&self.database, &index)
            .validate_consistency()
            .await?;

        Ok(IndexStats {
            vectors: index.len(),
            dimension: index.dimension(),
            self_test_passed,
            consistency,
        })
    }
}

/// Search with the first stored vector and expect it back at position 0
fn self_test(index: &VectorIndex) -> Result<bool> {
    let Some(first) = index.vector(0) else {
        return Ok(true);
    };
    let hits = index.search(first, 1).context("Index self-test search failed")?;
    let passed = hits.first().is_some_and(|hit| hit.position == 0);
    if let Some(hit) = hits.first() {
        debug!(
            "Self-test top hit: position {} score {:.4}",
            hit.position, hit.score
        );
    }
    Ok(passed)
}
