// Ingestion module
// Loads the arXiv snapshot into SQLite and splits abstracts into chunks

pub mod arxiv;
pub mod cleaning;


use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{debug, info};

pub use arxiv::{ArxivRecord, SnapshotFilter, SnapshotSummary};
pub use cleaning::clean_text;

use crate::config::{Config, IngestConfig};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewChunk, NewDocument};
use crate::embeddings::chunking::{ChunkingConfig, chunk_text};

const DOCUMENT_BATCH_SIZE: usize = 5000;
const CHUNK_BATCH_DOCUMENTS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub snapshot: SnapshotSummary,
    pub selected: usize,
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    pub documents: usize,
    pub chunks: usize,
    /// Documents whose cleaned abstract produced no chunk
    pub empty_documents: usize,
}

pub struct Ingestor {
    database: Database,
    ingest: IngestConfig,
    chunking: ChunkingConfig,
    show_progress: bool,
}

impl Ingestor {
    #[inline]
    pub fn new(database: Database, config: &Config) -> Self {
        Self {
            database,
            ingest: config.ingest.clone(),
            chunking: config.chunking.clone(),
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Filter the snapshot, optionally sample it, and insert the selected papers
    #[inline]
    pub async fn load_snapshot(&self, path: &Path) -> Result<LoadSummary> {
        let filter = SnapshotFilter::from_config(&self.ingest);
        let owned_path = path.to_path_buf();

        let (records, snapshot) =
            tokio::task::spawn_blocking(move || arxiv::collect_snapshot(&owned_path, &filter))
                .await
                .context("Snapshot reader task failed")??;

        let mut summary = self.load_records(records).await?;
        summary.snapshot = snapshot;
        Ok(summary)
    }

    #[inline]
    pub async fn load_records(&self, records: Vec<ArxivRecord>) -> Result<LoadSummary> {
        let records = sample_records(records, self.ingest.sample_size, self.ingest.sample_seed);
        let selected = records.len();
        info!("Inserting {} papers into the database", selected);

        let bar = progress_bar(self.show_progress, selected as u64, "Loading papers");
        let mut inserted = 0;

        for batch in records.chunks(DOCUMENT_BATCH_SIZE) {
            let documents: Vec<NewDocument> = batch.iter().map(to_new_document).collect();
            inserted += self
                .database
                .insert_documents_batch(&documents)
                .await
                .context("Failed to insert paper batch")?;
            bar.inc(batch.len() as u64);
            debug!("Inserted {} papers so far", inserted);
        }
        bar.finish_and_clear();

        let summary = LoadSummary {
            snapshot: SnapshotSummary::default(),
            selected,
            inserted,
            skipped: selected - inserted,
        };
        info!(
            "Loaded papers: {} inserted, {} already present",
            summary.inserted, summary.skipped
        );
        Ok(summary)
    }

    /// Chunk every paper that has no chunks yet
    #[inline]
    pub async fn chunk_documents(&self) -> Result<ChunkSummary> {
        let documents = self
            .database
            .list_documents_without_chunks()
            .await
            .context("Failed to list papers awaiting chunking")?;

        info!("Chunking {} papers", documents.len());
        let bar = progress_bar(self.show_progress, documents.len() as u64, "Chunking");
        let mut summary = ChunkSummary::default();

        for batch in documents.chunks(CHUNK_BATCH_DOCUMENTS) {
            let mut new_chunks = Vec::new();
            for document in batch {
                let chunks = chunk_text(&document.clean_abstract, &self.chunking);
                if chunks.is_empty() {
                    summary.empty_documents += 1;
                }
                new_chunks.extend(chunks.into_iter().map(|chunk| NewChunk {
                    document_id: document.document_id.clone(),
                    chunk_text: chunk.content,
                    chunk_index: saturating_i64(chunk.chunk_index),
                    token_count: saturating_i64(chunk.token_count),
                }));
            }

            summary.chunks += self
                .database
                .insert_chunks_batch(&new_chunks)
                .await
                .context("Failed to insert chunk batch")?;
            summary.documents += batch.len();
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        info!(
            "Created {} chunks from {} papers ({} too short to chunk)",
            summary.chunks, summary.documents, summary.empty_documents
        );
        Ok(summary)
    }
}

/// Deterministic random subset of `records`; `None` or a size at least the
/// input length keeps everything. The sample is returned in id order.
#[inline]
pub fn sample_records(
    mut records: Vec<ArxivRecord>,
    sample_size: Option<usize>,
    seed: u64,
) -> Vec<ArxivRecord> {
    let Some(size) = sample_size.filter(|&size| size < records.len()) else {
        return records;
    };

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    records.truncate(size);
    records.sort_by(|a, b| a.id.cmp(&b.id));
    info!("Using a sample of {} papers (seed {})", size, seed);
    records
}

/// Map a snapshot record to a stored paper. The abstract is cleaned here so
/// the stored row never changes after insertion.
#[inline]
pub fn to_new_document(record: &ArxivRecord) -> NewDocument {
    NewDocument {
        document_id: record.id.trim().to_string(),
        title: cleaning::collapse_whitespace(&record.title),
        authors: cleaning::collapse_whitespace(&record.authors),
        categories: record.categories.trim().to_string(),
        raw_abstract: record.abstract_text.clone(),
        clean_abstract: clean_text(&record.abstract_text),
        update_date: record.parsed_update_date(),
        word_count: saturating_i64(record.word_count()),
    }
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn progress_bar(visible: bool, len: u64, label: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(label.to_string());
    bar
}
