// Retrieval module
// Turns a query into ranked chunks: embed, normalize, search, join against the chunk store

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::sqlite::Database;
use crate::database::vector_index::{VectorIndex, normalize};
use crate::embeddings::Embedder;
use crate::indexer::{ConsistencyReport, ConsistencyValidator};
use crate::{RagError, Result};

/// One ranked chunk with the metadata of its paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Dense 1-based rank within the result set
    pub rank: usize,
    pub similarity: f32,
    pub chunk_id: i64,
    pub chunk_text: String,
    pub document_id: String,
    pub title: String,
    pub authors: String,
    pub categories: String,
    pub update_date: Option<NaiveDate>,
}

/// Read-only search over a loaded index and the chunk store.
///
/// Cloning is cheap; the index and embedder are shared.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    database: Database,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>, database: Database) -> Self {
        Self {
            embedder,
            index,
            database,
        }
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Top `top_k` chunks for `query`, most similar first.
    ///
    /// Arguments are checked before the embedder or the store is touched.
    /// Index positions whose chunk no longer exists are dropped and the
    /// remaining results are re-ranked densely.
    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidArgument("No query provided".to_string()));
        }
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }

        let mut embedding = self.embed_query(query).await?;
        normalize(&mut embedding);

        let hits = self.index.search(&embedding, top_k)?;
        debug!("Index returned {} candidates for top_k {}", hits.len(), top_k);

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let chunk = self
                .database
                .get_chunk_with_document(hit.chunk_id)
                .await
                .map_err(|e| RagError::Database(format!("{e:#}")))?;

            let Some(chunk) = chunk else {
                warn!(
                    "Index position {} refers to missing chunk {}",
                    hit.position, hit.chunk_id
                );
                continue;
            };

            results.push(RetrievedChunk {
                rank: results.len() + 1,
                similarity: hit.score,
                chunk_id: chunk.chunk_id,
                chunk_text: chunk.chunk_text,
                document_id: chunk.document_id,
                title: chunk.title,
                authors: chunk.authors,
                categories: chunk.categories,
                update_date: chunk.update_date,
            });
        }

        Ok(results)
    }

    /// Fail with `IndexMismatch` unless every positioned chunk agrees with
    /// the loaded index
    #[inline]
    pub async fn verify_alignment(&self) -> Result<ConsistencyReport> {
        let report = ConsistencyValidator::new(&self.database, &self.index)
            .validate_consistency()
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        if report.is_consistent {
            Ok(report)
        } else {
            Err(RagError::IndexMismatch(report.summary()))
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();

        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| RagError::Other(e.into()))?
            .map_err(|e| RagError::Embedding(format!("{e:#}")))
    }
}
