// Alignment validation between stored chunks and the vector index
// Every chunk with an embedding position must point at its own entry in the index


use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::database::sqlite::Database;
use crate::database::sqlite::models::EmbeddingPosition;
use crate::database::vector_index::VectorIndex;

/// A chunk whose embedding position holds a different chunk id in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMismatch {
    pub position: i64,
    pub stored_chunk_id: i64,
    pub indexed_chunk_id: i64,
}

/// Alignment check results between SQLite and the index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Chunks in SQLite with an assigned embedding position
    pub positioned_chunks: usize,
    /// Vectors in the index
    pub index_vectors: usize,
    /// Chunks whose position is negative or past the end of the index
    pub out_of_range: Vec<EmbeddingPosition>,
    /// Chunks whose position holds another chunk id
    pub mismatched: Vec<PositionMismatch>,
    /// Index entries no stored chunk refers to, e.g. after deleting papers
    pub unreferenced_positions: usize,
    /// Overall alignment status
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Compare stored positions against the index's chunk-id table
    #[inline]
    pub fn check(positions: &[EmbeddingPosition], index: &VectorIndex) -> Self {
        let mut out_of_range = Vec::new();
        let mut mismatched = Vec::new();
        let mut referenced = vec![false; index.len()];

        for entry in positions {
            let indexed = usize::try_from(entry.embedding_index)
                .ok()
                .and_then(|position| index.chunk_id_at(position).map(|id| (position, id)));

            match indexed {
                None => out_of_range.push(*entry),
                Some((position, indexed_chunk_id)) => {
                    if let Some(flag) = referenced.get_mut(position) {
                        *flag = true;
                    }
                    if indexed_chunk_id != entry.chunk_id {
                        mismatched.push(PositionMismatch {
                            position: entry.embedding_index,
                            stored_chunk_id: entry.chunk_id,
                            indexed_chunk_id,
                        });
                    }
                }
            }
        }

        let unreferenced_positions = referenced.iter().filter(|&&seen| !seen).count();
        let is_consistent = out_of_range.is_empty() && mismatched.is_empty();

        Self {
            positioned_chunks: positions.len(),
            index_vectors: index.len(),
            out_of_range,
            mismatched,
            unreferenced_positions,
            is_consistent,
        }
    }

    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is aligned: {} positioned chunks, {} vectors ({} without a stored chunk)",
                self.positioned_chunks, self.index_vectors, self.unreferenced_positions
            )
        } else {
            format!(
                "Index misaligned: {} issues ({} positions out of range, {} chunk id mismatches)",
                self.total_issues(),
                self.out_of_range.len(),
                self.mismatched.len()
            )
        }
    }

    /// Get the total number of alignment violations
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.out_of_range.len() + self.mismatched.len()
    }
}

/// Performs alignment validation between SQLite and a loaded index
pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    index: &'a VectorIndex,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database, index: &'a VectorIndex) -> Self {
        Self { database, index }
    }

    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Validating index alignment against the chunk store");

        let positions = self
            .database
            .list_embedding_positions()
            .await
            .context("Failed to load embedding positions")?;

        let report = ConsistencyReport::check(&positions, self.index);

        if report.is_consistent {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
            log_consistency_issues(&report);
        }

        Ok(report)
    }
}

fn log_consistency_issues(report: &ConsistencyReport) {
    for entry in report.out_of_range.iter().take(5) {
        warn!(
            "Chunk {} has embedding position {} but the index holds {} vectors",
            entry.chunk_id, entry.embedding_index, report.index_vectors
        );
    }

    for mismatch in report.mismatched.iter().take(5) {
        warn!(
            "Position {} belongs to chunk {} in the index, not chunk {}",
            mismatch.position, mismatch.indexed_chunk_id, mismatch.stored_chunk_id
        );
    }
}
