// RAG module
// Prompt assembly over retrieved chunks, answer generation and provenance logging


use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewQueryRecord, NewRetrievalLog};
use crate::generation::{GenerationError, Generator};
use crate::retrieval::{RetrievedChunk, Retriever};

/// Answer to one question, with the sources it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub query: String,
    pub response: String,
    pub sources: Vec<RetrievedChunk>,
    /// `None` when the audit trail could not be written
    pub query_id: Option<i64>,
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
    pub total_time_ms: u64,
}

/// One `[Paper N]` block per result, separated by blank lines
#[inline]
pub fn build_context(results: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for (number, result) in results.iter().enumerate() {
        if number > 0 {
            context.push('\n');
        }
        let _ = write!(
            context,
            "[Paper {}]\nTitle: {}\nCategories: {}\nContent: {}\n",
            number + 1,
            result.title,
            result.categories,
            result.chunk_text
        );
    }
    context
}

#[inline]
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful research assistant. Answer the question based on the provided research papers.

Research Papers:
{context}

Question: {query}

Instructions:
- Answer based only on the provided papers
- Cite which papers you use (e.g., \"According to Paper 1...\")
- If the papers don't contain relevant information, say so
- Be concise and accurate

Answer:"
    )
}

/// Generates grounded answers and records them with their sources
#[derive(Clone)]
pub struct AnswerComposer {
    generator: Arc<dyn Generator>,
    database: Database,
}

impl AnswerComposer {
    #[inline]
    pub fn new(generator: Arc<dyn Generator>, database: Database) -> Self {
        Self {
            generator,
            database,
        }
    }

    /// Answer `query` from `sources`. Generation failures become the answer
    /// text; audit failures leave `query_id` empty. Neither is an error.
    #[inline]
    pub async fn compose(
        &self,
        query: &str,
        sources: Vec<RetrievedChunk>,
        retrieval_time: Duration,
    ) -> RagAnswer {
        let started = Instant::now();
        let prompt = build_prompt(query, &build_context(&sources));

        let generation_started = Instant::now();
        let response = self.generate(prompt).await;
        let generation_time = generation_started.elapsed();
        let total_time = retrieval_time + started.elapsed();

        let mut answer = RagAnswer {
            query: query.to_string(),
            response,
            sources,
            query_id: None,
            retrieval_time_ms: millis(retrieval_time),
            generation_time_ms: millis(generation_time),
            total_time_ms: millis(total_time),
        };
        answer.query_id = self.log_answer(&answer).await;
        answer
    }

    async fn generate(&self, prompt: String) -> String {
        let generator = Arc::clone(&self.generator);
        debug!(
            "Generating answer with {} (prompt length: {})",
            generator.model_name(),
            prompt.len()
        );

        let outcome = tokio::task::spawn_blocking(move || generator.generate(&prompt))
            .await
            .unwrap_or_else(|e| Err(GenerationError::Transport(e.to_string())));

        outcome.unwrap_or_else(|e| e.placeholder_answer())
    }

    async fn log_answer(&self, answer: &RagAnswer) -> Option<i64> {
        let record = NewQueryRecord {
            user_query_text: answer.query.clone(),
            response_text: answer.response.clone(),
            retrieval_time_ms: as_i64(answer.retrieval_time_ms),
            generation_time_ms: as_i64(answer.generation_time_ms),
            total_latency_ms: as_i64(answer.total_time_ms),
        };
        let logs: Vec<NewRetrievalLog> = answer
            .sources
            .iter()
            .map(|source| NewRetrievalLog {
                document_id: source.document_id.clone(),
                chunk_id: source.chunk_id,
                similarity_score: f64::from(source.similarity),
                retrieval_rank: as_i64(source.rank),
                was_used_in_response: true,
            })
            .collect();

        match self.database.record_query(&record, &logs).await {
            Ok((query_id, written)) => {
                debug!("Logged query {} with {} retrieval entries", query_id, written);
                Some(query_id)
            }
            Err(e) => {
                warn!("Failed to log query: {:#}", e);
                None
            }
        }
    }
}

/// Retrieval followed by answer composition
#[derive(Clone)]
pub struct RagPipeline {
    retriever: Retriever,
    composer: AnswerComposer,
}

impl RagPipeline {
    #[inline]
    pub fn new(retriever: Retriever, composer: AnswerComposer) -> Self {
        Self {
            retriever,
            composer,
        }
    }

    #[inline]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    #[inline]
    pub async fn ask(&self, query: &str, top_k: usize) -> Result<RagAnswer> {
        let retrieval_started = Instant::now();
        let sources = self.retriever.search(query, top_k).await?;
        let retrieval_time = retrieval_started.elapsed();
        info!(
            "Retrieved {} sources in {}ms",
            sources.len(),
            retrieval_time.as_millis()
        );

        let answer = self
            .composer
            .compose(query.trim(), sources, retrieval_time)
            .await;
        info!(
            "Answered in {}ms (generation {}ms)",
            answer.total_time_ms, answer.generation_time_ms
        );
        Ok(answer)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn as_i64<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}
