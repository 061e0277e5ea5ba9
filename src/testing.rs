// Test doubles for the model seams

use anyhow::{Result, bail};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::database::sqlite::Database;
use crate::database::sqlite::models::{EmbeddingPosition, NewChunk, NewDocument};
use crate::database::vector_index::VectorIndex;
use crate::embeddings::Embedder;
use crate::generation::{GenerationError, Generator};

pub(crate) const KEYWORDS: &[&str] = &["graph", "quantum", "language", "vision"];

/// Two papers: `d1` with a graph chunk and a language chunk, `d2` with a
/// single quantum chunk
pub(crate) const CORPUS: &[(&str, &str, &[&str])] = &[
    (
        "d1",
        "Graph Learning",
        &[
            "graph neural networks learn over graph structured data",
            "language models can reason about graph properties",
        ],
    ),
    (
        "d2",
        "Quantum Codes",
        &["quantum error correction protects quantum states"],
    ),
];

/// Store `CORPUS`, embed it with `embedder` and return the aligned index
pub(crate) async fn seed_corpus(
    data_dir: &Path,
    embedder: &KeywordEmbedder,
) -> Result<(Database, Arc<VectorIndex>)> {
    let database = Database::initialize_from_config_dir(data_dir).await?;

    for (document_id, title, chunks) in CORPUS {
        database
            .insert_document(&NewDocument {
                document_id: (*document_id).to_string(),
                title: (*title).to_string(),
                authors: "A. Author and B. Author".to_string(),
                categories: "cs.LG cs.AI".to_string(),
                raw_abstract: chunks.join(" "),
                clean_abstract: chunks.join(" "),
                update_date: chrono::NaiveDate::from_ymd_opt(2023, 5, 1),
                word_count: 10,
            })
            .await?;

        let new_chunks: Vec<NewChunk> = chunks
            .iter()
            .enumerate()
            .map(|(chunk_index, text)| NewChunk {
                document_id: (*document_id).to_string(),
                chunk_text: (*text).to_string(),
                chunk_index: chunk_index as i64,
                token_count: text.split_whitespace().count() as i64,
            })
            .collect();
        database.insert_chunks_batch(&new_chunks).await?;
    }

    let chunks = database.list_chunks_for_embedding().await?;
    let texts: Vec<String> = chunks.iter().map(|c| c.chunk_text.clone()).collect();
    let ids: Vec<i64> = chunks.iter().map(|c| c.chunk_id).collect();

    let mut index = VectorIndex::new(embedder.dimension())?;
    index.add(&embedder.embed_batch(&texts)?, &ids)?;

    let positions: Vec<EmbeddingPosition> = ids
        .iter()
        .enumerate()
        .map(|(position, &chunk_id)| EmbeddingPosition {
            chunk_id,
            embedding_index: position as i64,
        })
        .collect();
    database.assign_embedding_indices(&positions).await?;

    Ok((database, Arc::new(index)))
}

/// Embeds text as keyword counts plus a constant bias component, so related
/// texts land close together and no text maps to the zero vector.
pub(crate) struct KeywordEmbedder {
    keywords: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub(crate) fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn dimension(&self) -> usize {
        self.keywords.len() + 1
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .keywords
            .iter()
            .map(|keyword| lowered.matches(keyword.as_str()).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectorize(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

pub(crate) struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding service unavailable")
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }

    fn model_name(&self) -> &str {
        "failing-test"
    }
}

/// Returns a fixed answer and remembers the last prompt it saw
pub(crate) struct FixedGenerator {
    answer: String,
    last_prompt: Mutex<Option<String>>,
}

impl FixedGenerator {
    pub(crate) fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            last_prompt: Mutex::new(None),
        }
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .map(|prompt| prompt.clone())
            .unwrap_or_default()
    }
}

impl Generator for FixedGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.to_string());
        }
        Ok(self.answer.clone())
    }

    fn model_name(&self) -> &str {
        "fixed-test"
    }
}

pub(crate) struct UnreachableGenerator;

impl Generator for UnreachableGenerator {
    fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Transport("connection refused".to_string()))
    }

    fn model_name(&self) -> &str {
        "unreachable-test"
    }
}
