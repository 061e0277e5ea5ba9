
mod codec;

pub use codec::ArtifactKind;

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::RagError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Dimension must be greater than zero")]
    ZeroDimension,
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("{vectors} vectors but {chunk_ids} chunk ids")]
    LengthMismatch { vectors: usize, chunk_ids: usize },
    #[error("Vector {position} contains non-finite values")]
    NonFinite { position: usize },
    #[error("Corrupt vector file: {0}")]
    Corrupt(String),
    #[error("Checksum mismatch: file records {expected}, contents hash to {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("Unsupported vector file version {0}")]
    UnsupportedVersion(u32),
    #[error("Expected a {expected} file, found artifact kind {found}")]
    WrongKind { expected: ArtifactKind, found: u8 },
    #[error("Too large for the vector file format: {0}")]
    TooLarge(String),
    #[error("Failed to encode vector file: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<IndexError> for RagError {
    #[inline]
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Io { path, source } => RagError::Io(std::io::Error::new(
                source.kind(),
                format!("{}: {source}", path.display()),
            )),
            other => RagError::IndexMismatch(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub chunk_id: i64,
    pub score: f32,
}

/// Scale `vector` to unit length in place. The zero vector is left untouched.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm <= f64::EPSILON {
        return;
    }
    for value in vector.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
}

fn check_vector(vector: &[f32], dimension: usize, position: usize) -> Result<(), IndexError> {
    if vector.len() != dimension {
        return Err(IndexError::Dimension {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::NonFinite { position });
    }
    Ok(())
}

/// Raw embeddings staged between the embedding and index-building stages.
///
/// Row `i` holds the vector of `chunk_ids[i]`, which is also that chunk's
/// `embedding_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimension: usize,
    vectors: Vec<f32>,
    chunk_ids: Vec<i64>,
}

impl EmbeddingMatrix {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            vectors: Vec::new(),
            chunk_ids: Vec::new(),
        })
    }

    #[inline]
    pub fn push(&mut self, chunk_id: i64, vector: &[f32]) -> Result<usize, IndexError> {
        let position = self.chunk_ids.len();
        check_vector(vector, self.dimension, position)?;
        self.vectors.extend_from_slice(vector);
        self.chunk_ids.push(chunk_id);
        Ok(position)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    #[inline]
    pub fn chunk_ids(&self) -> &[i64] {
        &self.chunk_ids
    }

    #[inline]
    pub fn rows(&self) -> impl Iterator<Item = (i64, &[f32])> {
        self.chunk_ids
            .iter()
            .copied()
            .zip(self.vectors.chunks_exact(self.dimension))
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = codec::encode(
            ArtifactKind::Embeddings,
            self.dimension,
            &self.chunk_ids,
            &self.vectors,
        )?;
        codec::write_atomic(path, &bytes)?;
        debug!("Saved {} embeddings to {}", self.len(), path.display());
        Ok(())
    }

    #[inline]
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = codec::read_file(path)?;
        let decoded = codec::decode(&bytes, ArtifactKind::Embeddings)?;
        Ok(Self {
            dimension: decoded.dimension,
            vectors: decoded.vectors,
            chunk_ids: decoded.chunk_ids,
        })
    }
}

/// Flat exhaustive inner-product index over unit vectors.
///
/// Position `i` stores the vector for `chunk_ids[i]`. Vectors are normalized
/// when added, so scores are cosine similarities in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<f32>,
    chunk_ids: Vec<i64>,
}

impl VectorIndex {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            vectors: Vec::new(),
            chunk_ids: Vec::new(),
        })
    }

    /// Build an index from staged embeddings, keeping their order
    #[inline]
    pub fn from_matrix(matrix: &EmbeddingMatrix) -> Result<Self, IndexError> {
        let mut index = Self::new(matrix.dimension())?;
        index.vectors.reserve(matrix.len() * matrix.dimension());
        index.chunk_ids.reserve(matrix.len());
        for (chunk_id, row) in matrix.rows() {
            index.push_normalized(chunk_id, row);
        }
        Ok(index)
    }

    /// Append a batch. Positions continue from the current length.
    ///
    /// The whole batch is validated before anything is stored, so a rejected
    /// batch leaves the index unchanged.
    #[inline]
    pub fn add(&mut self, vectors: &[Vec<f32>], chunk_ids: &[i64]) -> Result<(), IndexError> {
        if vectors.len() != chunk_ids.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                chunk_ids: chunk_ids.len(),
            });
        }

        let start = self.len();
        for (offset, vector) in vectors.iter().enumerate() {
            check_vector(vector, self.dimension, start + offset)?;
        }

        self.vectors.reserve(vectors.len() * self.dimension);
        self.chunk_ids.reserve(chunk_ids.len());
        for (vector, &chunk_id) in vectors.iter().zip(chunk_ids) {
            self.push_normalized(chunk_id, vector);
        }
        Ok(())
    }

    fn push_normalized(&mut self, chunk_id: i64, vector: &[f32]) {
        let start = self.vectors.len();
        self.vectors.extend_from_slice(vector);
        if let Some(stored) = self.vectors.get_mut(start..) {
            normalize(stored);
        }
        self.chunk_ids.push(chunk_id);
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    #[inline]
    pub fn chunk_ids(&self) -> &[i64] {
        &self.chunk_ids
    }

    #[inline]
    pub fn chunk_id_at(&self, position: usize) -> Option<i64> {
        self.chunk_ids.get(position).copied()
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Top `k` positions by inner product with `query`.
    ///
    /// `query` is expected to be unit length already. Results are ordered by
    /// descending score with ties broken by ascending position.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        check_vector(query, self.dimension, 0)?;

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .vectors
            .chunks_exact(self.dimension)
            .zip(&self.chunk_ids)
            .enumerate()
            .map(|(position, (stored, &chunk_id))| SearchHit {
                position,
                chunk_id,
                score: dot(stored, query),
            })
            .collect();

        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank_order);
            hits.truncate(k);
        }
        hits.sort_by(rank_order);

        Ok(hits)
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = codec::encode(
            ArtifactKind::Index,
            self.dimension,
            &self.chunk_ids,
            &self.vectors,
        )?;
        codec::write_atomic(path, &bytes)?;
        debug!(
            "Saved index with {} vectors of dimension {} to {}",
            self.len(),
            self.dimension,
            path.display()
        );
        Ok(())
    }

    #[inline]
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = codec::read_file(path)?;
        let decoded = codec::decode(&bytes, ArtifactKind::Index)?;
        debug!(
            "Loaded index with {} vectors of dimension {} from {}",
            decoded.chunk_ids.len(),
            decoded.dimension,
            path.display()
        );
        Ok(Self {
            dimension: decoded.dimension,
            vectors: decoded.vectors,
            chunk_ids: decoded.chunk_ids,
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rank_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}
