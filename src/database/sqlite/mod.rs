use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    Chunk, ChunkWithDocument, CorpusStatistics, Document, EmbeddingPosition, NewChunk,
    NewDocument, NewQueryRecord, NewRetrievalLog, QueryRecord, RetrievalLog,
};
use crate::database::sqlite::queries::{
    ChunkQueries, DocumentQueries, QueryLogQueries, StatisticsQueries,
};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_path).await
    }

    // Document operations
    #[inline]
    pub async fn insert_document(&self, document: &NewDocument) -> Result<bool> {
        DocumentQueries::create(&self.pool, document).await
    }

    #[inline]
    pub async fn insert_documents_batch(&self, documents: &[NewDocument]) -> Result<usize> {
        DocumentQueries::create_batch(&self.pool, documents).await
    }

    #[inline]
    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, document_id).await
    }

    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        DocumentQueries::delete(&self.pool, document_id).await
    }

    #[inline]
    pub async fn count_documents(&self) -> Result<i64> {
        DocumentQueries::count(&self.pool).await
    }

    #[inline]
    pub async fn list_documents_without_chunks(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_without_chunks(&self.pool).await
    }

    // Chunk operations
    #[inline]
    pub async fn insert_chunk(&self, chunk: &NewChunk) -> Result<Chunk> {
        ChunkQueries::create(&self.pool, chunk).await
    }

    #[inline]
    pub async fn insert_chunks_batch(&self, chunks: &[NewChunk]) -> Result<usize> {
        ChunkQueries::create_batch(&self.pool, chunks).await
    }

    #[inline]
    pub async fn get_chunk_with_document(
        &self,
        chunk_id: i64,
    ) -> Result<Option<ChunkWithDocument>> {
        ChunkQueries::get_with_document(&self.pool, chunk_id).await
    }

    #[inline]
    pub async fn list_chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        ChunkQueries::list_by_document(&self.pool, document_id).await
    }

    #[inline]
    pub async fn list_chunks_for_embedding(&self) -> Result<Vec<Chunk>> {
        ChunkQueries::list_for_embedding(&self.pool).await
    }

    #[inline]
    pub async fn assign_embedding_indices(&self, positions: &[EmbeddingPosition]) -> Result<usize> {
        ChunkQueries::assign_embedding_indices(&self.pool, positions).await
    }

    #[inline]
    pub async fn list_embedding_positions(&self) -> Result<Vec<EmbeddingPosition>> {
        ChunkQueries::list_embedding_positions(&self.pool).await
    }

    // Query log operations
    #[inline]
    pub async fn record_query(
        &self,
        query: &NewQueryRecord,
        logs: &[NewRetrievalLog],
    ) -> Result<(i64, usize)> {
        QueryLogQueries::record(&self.pool, query, logs).await
    }

    #[inline]
    pub async fn get_query(&self, query_id: i64) -> Result<Option<QueryRecord>> {
        QueryLogQueries::get_query(&self.pool, query_id).await
    }

    #[inline]
    pub async fn retrieval_logs_for_query(&self, query_id: i64) -> Result<Vec<RetrievalLog>> {
        QueryLogQueries::logs_for_query(&self.pool, query_id).await
    }

    #[inline]
    pub async fn retrieval_logs_for_document(&self, document_id: &str) -> Result<Vec<RetrievalLog>> {
        QueryLogQueries::logs_for_document(&self.pool, document_id).await
    }

    #[inline]
    pub async fn statistics(&self, top_categories: usize) -> Result<CorpusStatistics> {
        StatisticsQueries::corpus(&self.pool, top_categories).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
