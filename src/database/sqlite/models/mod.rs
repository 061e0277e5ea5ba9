
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub authors: String,
    pub categories: String,
    pub raw_abstract: String,
    pub clean_abstract: String,
    pub update_date: Option<NaiveDate>,
    pub word_count: i64,
    pub created_timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub document_id: String,
    pub title: String,
    pub authors: String,
    pub categories: String,
    pub raw_abstract: String,
    pub clean_abstract: String,
    pub update_date: Option<NaiveDate>,
    pub word_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub chunk_id: i64,
    pub document_id: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub token_count: i64,
    pub embedding_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChunk {
    pub document_id: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub token_count: i64,
}

/// A chunk joined with the metadata of its parent paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkWithDocument {
    pub chunk_id: i64,
    pub document_id: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub title: String,
    pub authors: String,
    pub categories: String,
    pub update_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EmbeddingPosition {
    pub chunk_id: i64,
    pub embedding_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueryRecord {
    pub query_id: i64,
    pub user_query_text: String,
    pub query_timestamp: NaiveDateTime,
    pub response_text: Option<String>,
    pub response_quality_score: Option<f64>,
    pub retrieval_time_ms: i64,
    pub generation_time_ms: i64,
    pub total_latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueryRecord {
    pub user_query_text: String,
    pub response_text: String,
    pub retrieval_time_ms: i64,
    pub generation_time_ms: i64,
    pub total_latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RetrievalLog {
    pub log_id: i64,
    pub query_id: i64,
    pub document_id: String,
    pub chunk_id: i64,
    pub similarity_score: f64,
    pub retrieval_rank: i64,
    pub was_used_in_response: bool,
    pub log_timestamp: NaiveDateTime,
}

/// One retrieved source of a query, before attribution to a stored chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRetrievalLog {
    pub document_id: String,
    pub chunk_id: i64,
    pub similarity_score: f64,
    pub retrieval_rank: i64,
    pub was_used_in_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CorpusStatistics {
    pub documents: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub queries: i64,
    pub retrieval_logs: i64,
    pub top_categories: Vec<CategoryCount>,
    pub earliest_update: Option<NaiveDate>,
    pub latest_update: Option<NaiveDate>,
    pub mean_word_count: Option<f64>,
}

impl Document {
    /// Individual category codes, e.g. `cs.LG stat.ML` -> `["cs.LG", "stat.ML"]`
    #[inline]
    pub fn category_list(&self) -> Vec<&str> {
        self.categories.split_whitespace().collect()
    }

    #[inline]
    pub fn primary_category(&self) -> Option<&str> {
        self.categories.split_whitespace().next()
    }
}

impl Chunk {
    #[inline]
    pub fn is_embedded(&self) -> bool {
        self.embedding_index.is_some()
    }
}

impl CorpusStatistics {
    /// Share of chunks with an assigned embedding position, in percent
    #[inline]
    pub fn embedding_coverage(&self) -> f64 {
        if self.chunks == 0 {
            0.0
        } else {
            (self.embedded_chunks as f64 / self.chunks as f64) * 100.0
        }
    }
}
