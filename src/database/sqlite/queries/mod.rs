
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, warn};

const DOCUMENT_COLUMNS: &str = "document_id, title, authors, categories, raw_abstract, \
     clean_abstract, update_date, word_count, created_timestamp";

const CHUNK_COLUMNS: &str =
    "chunk_id, document_id, chunk_text, chunk_index, token_count, embedding_index";

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a paper; returns `false` when the id is already stored
    #[inline]
    pub async fn create(pool: &SqlitePool, document: &NewDocument) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (document_id, title, authors, categories, raw_abstract,
                                   clean_abstract, update_date, word_count, created_timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO NOTHING
            "#,
        )
        .bind(&document.document_id)
        .bind(&document.title)
        .bind(&document.authors)
        .bind(&document.categories)
        .bind(&document.raw_abstract)
        .bind(&document.clean_abstract)
        .bind(document.update_date)
        .bind(document.word_count)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .with_context(|| format!("Failed to insert document {}", document.document_id))?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn create_batch(pool: &SqlitePool, documents: &[NewDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for batch document insert")?;

        let mut inserted_count = 0;
        let now = Utc::now().naive_utc();

        for document in documents {
            let result = sqlx::query(
                r#"
                INSERT INTO documents (document_id, title, authors, categories, raw_abstract,
                                       clean_abstract, update_date, word_count, created_timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(document_id) DO NOTHING
                "#,
            )
            .bind(&document.document_id)
            .bind(&document.title)
            .bind(&document.authors)
            .bind(&document.categories)
            .bind(&document.raw_abstract)
            .bind(&document.clean_abstract)
            .bind(document.update_date)
            .bind(document.word_count)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Failed to insert document {}", document.document_id))?;

            if result.rows_affected() > 0 {
                inserted_count += 1;
            }
        }

        transaction
            .commit()
            .await
            .context("Failed to commit batch document insert transaction")?;

        debug!(
            "Inserted {} of {} documents",
            inserted_count,
            documents.len()
        );
        Ok(inserted_count)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, document_id: &str) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = ?"
        ))
        .bind(document_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")?;

        Ok(document)
    }

    /// Delete a paper together with its chunks and retrieval logs
    #[inline]
    pub async fn delete(pool: &SqlitePool, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(document_id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count documents")?;
        Ok(count)
    }

    /// Papers that have not been chunked yet
    #[inline]
    pub async fn list_without_chunks(pool: &SqlitePool) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS} FROM documents d
            WHERE NOT EXISTS (
                SELECT 1 FROM document_chunks c WHERE c.document_id = d.document_id
            )
            ORDER BY document_id
            "#
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list documents without chunks")?;

        Ok(documents)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, chunk: &NewChunk) -> Result<Chunk> {
        let chunk_id = sqlx::query(
            r#"
            INSERT INTO document_chunks (document_id, chunk_text, chunk_index, token_count)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.document_id)
        .bind(&chunk.chunk_text)
        .bind(chunk.chunk_index)
        .bind(chunk.token_count)
        .execute(pool)
        .await
        .with_context(|| {
            format!(
                "Failed to insert chunk {} of document {}",
                chunk.chunk_index, chunk.document_id
            )
        })?
        .last_insert_rowid();

        Ok(Chunk {
            chunk_id,
            document_id: chunk.document_id.clone(),
            chunk_text: chunk.chunk_text.clone(),
            chunk_index: chunk.chunk_index,
            token_count: chunk.token_count,
            embedding_index: None,
        })
    }

    /// Insert chunks atomically; a chunk without a parent paper fails the whole batch
    #[inline]
    pub async fn create_batch(pool: &SqlitePool, chunks: &[NewChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for batch chunk insert")?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (document_id, chunk_text, chunk_index, token_count)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.document_id)
            .bind(&chunk.chunk_text)
            .bind(chunk.chunk_index)
            .bind(chunk.token_count)
            .execute(&mut *transaction)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert chunk {} of document {}",
                    chunk.chunk_index, chunk.document_id
                )
            })?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit batch chunk insert transaction")?;

        debug!("Created {} chunks", chunks.len());
        Ok(chunks.len())
    }

    #[inline]
    pub async fn get_by_id<'e, E>(executor: E, chunk_id: i64) -> Result<Option<Chunk>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let chunk = sqlx::query_as::<_, Chunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE chunk_id = ?"
        ))
        .bind(chunk_id)
        .fetch_optional(executor)
        .await
        .context("Failed to get chunk by id")?;

        Ok(chunk)
    }

    #[inline]
    pub async fn get_with_document(
        pool: &SqlitePool,
        chunk_id: i64,
    ) -> Result<Option<ChunkWithDocument>> {
        let chunk = sqlx::query_as::<_, ChunkWithDocument>(
            r#"
            SELECT c.chunk_id,
                   c.document_id,
                   c.chunk_text,
                   c.chunk_index,
                   d.title,
                   d.authors,
                   d.categories,
                   d.update_date
            FROM document_chunks c
            JOIN documents d ON c.document_id = d.document_id
            WHERE c.chunk_id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chunk with document metadata")?;

        Ok(chunk)
    }

    #[inline]
    pub async fn list_by_document(pool: &SqlitePool, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE document_id = ? ORDER BY chunk_index"
        ))
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for document")?;

        Ok(chunks)
    }

    #[inline]
    pub async fn first_for_document<'e, E>(executor: E, document_id: &str) -> Result<Option<Chunk>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let chunk = sqlx::query_as::<_, Chunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE document_id = ? \
             ORDER BY chunk_index LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(executor)
        .await
        .context("Failed to get first chunk for document")?;

        Ok(chunk)
    }

    /// All chunks in `chunk_id` order, the order embedding positions are assigned in
    #[inline]
    pub async fn list_for_embedding(pool: &SqlitePool) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks ORDER BY chunk_id"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for embedding")?;

        Ok(chunks)
    }

    /// Replace every embedding position with `positions` in one transaction
    #[inline]
    pub async fn assign_embedding_indices(
        pool: &SqlitePool,
        positions: &[EmbeddingPosition],
    ) -> Result<usize> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for embedding index assignment")?;

        sqlx::query("UPDATE document_chunks SET embedding_index = NULL")
            .execute(&mut *transaction)
            .await
            .context("Failed to clear previous embedding indices")?;

        let mut updated = 0;
        for position in positions {
            let result =
                sqlx::query("UPDATE document_chunks SET embedding_index = ? WHERE chunk_id = ?")
                    .bind(position.embedding_index)
                    .bind(position.chunk_id)
                    .execute(&mut *transaction)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to assign embedding index {} to chunk {}",
                            position.embedding_index, position.chunk_id
                        )
                    })?;

            if result.rows_affected() == 0 {
                warn!(
                    "Chunk {} vanished before its embedding index was assigned",
                    position.chunk_id
                );
            }
            updated += result.rows_affected() as usize;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit embedding index assignment")?;

        debug!("Assigned {} embedding indices", updated);
        Ok(updated)
    }

    #[inline]
    pub async fn list_embedding_positions(pool: &SqlitePool) -> Result<Vec<EmbeddingPosition>> {
        let positions = sqlx::query_as::<_, EmbeddingPosition>(
            r#"
            SELECT chunk_id, embedding_index FROM document_chunks
            WHERE embedding_index IS NOT NULL
            ORDER BY embedding_index
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to list embedding positions")?;

        Ok(positions)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM document_chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;
        Ok(count)
    }

    #[inline]
    pub async fn count_embedded(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM document_chunks WHERE embedding_index IS NOT NULL",
        )
        .fetch_one(pool)
        .await
        .context("Failed to count embedded chunks")?;
        Ok(count)
    }
}

pub struct QueryLogQueries;

impl QueryLogQueries {
    /// Store a query record and its retrieval logs atomically.
    ///
    /// Each log is attributed to its chunk when that chunk still exists, else to
    /// the first chunk of its paper. Logs whose paper is gone are skipped.
    /// Returns the new query id and the number of logs written.
    #[inline]
    pub async fn record(
        pool: &SqlitePool,
        query: &NewQueryRecord,
        logs: &[NewRetrievalLog],
    ) -> Result<(i64, usize)> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for query logging")?;

        let now = Utc::now().naive_utc();
        let query_id = sqlx::query(
            r#"
            INSERT INTO queries (user_query_text, query_timestamp, response_text,
                                 retrieval_time_ms, generation_time_ms, total_latency_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&query.user_query_text)
        .bind(now)
        .bind(&query.response_text)
        .bind(query.retrieval_time_ms)
        .bind(query.generation_time_ms)
        .bind(query.total_latency_ms)
        .execute(&mut *transaction)
        .await
        .context("Failed to insert query record")?
        .last_insert_rowid();

        let mut written = 0;
        for log in logs {
            let exact = ChunkQueries::get_by_id(&mut *transaction, log.chunk_id)
                .await?
                .filter(|chunk| chunk.document_id == log.document_id);

            let attributed = match exact {
                Some(chunk) => Some(chunk),
                None => ChunkQueries::first_for_document(&mut *transaction, &log.document_id).await?,
            };

            let Some(chunk) = attributed else {
                warn!(
                    "Skipping retrieval log for missing document {}",
                    log.document_id
                );
                continue;
            };
            let chunk_id = chunk.chunk_id;

            sqlx::query(
                r#"
                INSERT INTO retrieval_logs (query_id, document_id, chunk_id, similarity_score,
                                            retrieval_rank, was_used_in_response, log_timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(query_id)
            .bind(&log.document_id)
            .bind(chunk_id)
            .bind(log.similarity_score)
            .bind(log.retrieval_rank)
            .bind(log.was_used_in_response)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Failed to insert retrieval log rank {}", log.retrieval_rank))?;

            written += 1;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit query logging transaction")?;

        debug!("Logged query {} with {} sources", query_id, written);
        Ok((query_id, written))
    }

    #[inline]
    pub async fn get_query(pool: &SqlitePool, query_id: i64) -> Result<Option<QueryRecord>> {
        let record = sqlx::query_as::<_, QueryRecord>(
            r#"
            SELECT query_id, user_query_text, query_timestamp, response_text,
                   response_quality_score, retrieval_time_ms, generation_time_ms,
                   total_latency_ms
            FROM queries WHERE query_id = ?
            "#,
        )
        .bind(query_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get query record")?;

        Ok(record)
    }

    #[inline]
    pub async fn logs_for_query(pool: &SqlitePool, query_id: i64) -> Result<Vec<RetrievalLog>> {
        let logs = sqlx::query_as::<_, RetrievalLog>(
            r#"
            SELECT log_id, query_id, document_id, chunk_id, similarity_score,
                   retrieval_rank, was_used_in_response, log_timestamp
            FROM retrieval_logs WHERE query_id = ?
            ORDER BY retrieval_rank
            "#,
        )
        .bind(query_id)
        .fetch_all(pool)
        .await
        .context("Failed to list retrieval logs")?;

        Ok(logs)
    }

    #[inline]
    pub async fn logs_for_document(
        pool: &SqlitePool,
        document_id: &str,
    ) -> Result<Vec<RetrievalLog>> {
        let logs = sqlx::query_as::<_, RetrievalLog>(
            r#"
            SELECT log_id, query_id, document_id, chunk_id, similarity_score,
                   retrieval_rank, was_used_in_response, log_timestamp
            FROM retrieval_logs WHERE document_id = ?
            ORDER BY log_id
            "#,
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list retrieval logs for document")?;

        Ok(logs)
    }
}

pub struct StatisticsQueries;

impl StatisticsQueries {
    #[inline]
    pub async fn corpus(pool: &SqlitePool, top_categories: usize) -> Result<CorpusStatistics> {
        let documents = DocumentQueries::count(pool).await?;
        let chunks = ChunkQueries::count(pool).await?;
        let embedded_chunks = ChunkQueries::count_embedded(pool).await?;

        let queries = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queries")
            .fetch_one(pool)
            .await
            .context("Failed to count queries")?;

        let retrieval_logs = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM retrieval_logs")
            .fetch_one(pool)
            .await
            .context("Failed to count retrieval logs")?;

        let (earliest, latest) = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT MIN(update_date), MAX(update_date) FROM documents",
        )
        .fetch_one(pool)
        .await
        .context("Failed to get date range")?;

        let mean_word_count =
            sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(word_count) FROM documents")
                .fetch_one(pool)
                .await
                .context("Failed to get mean word count")?;

        let grouped = sqlx::query_as::<_, (String, i64)>(
            "SELECT categories, COUNT(*) FROM documents GROUP BY categories",
        )
        .fetch_all(pool)
        .await
        .context("Failed to count categories")?;

        Ok(CorpusStatistics {
            documents,
            chunks,
            embedded_chunks,
            queries,
            retrieval_logs,
            top_categories: rank_categories(&grouped, top_categories),
            earliest_update: earliest.as_deref().and_then(parse_date),
            latest_update: latest.as_deref().and_then(parse_date),
            mean_word_count,
        })
    }
}

/// Split space-separated category lists and rank individual codes by frequency
fn rank_categories(grouped: &[(String, i64)], limit: usize) -> Vec<CategoryCount> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for (categories, count) in grouped {
        for category in categories.split_whitespace() {
            *counts.entry(category).or_default() += count;
        }
    }

    let mut ranked: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    ranked.truncate(limit);
    ranked
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    value
        .get(..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}
