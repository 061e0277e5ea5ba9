// Database module
// SQLite holds papers, chunks and query logs; the flat vector index lives in its own file

pub mod sqlite;
pub mod vector_index;

pub use sqlite::*;
pub use vector_index::{EmbeddingMatrix, IndexError, SearchHit, VectorIndex};
