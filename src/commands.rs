use anyhow::{Context, Result, bail};
use dialoguer::Confirm;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::vector_index::VectorIndex;
use crate::embeddings::OllamaClient;
use crate::indexer::{ConsistencyValidator, EmbeddingStats, IndexStats, Indexer};
use crate::ingest::{ChunkSummary, Ingestor, LoadSummary};
use crate::retrieval::RetrievedChunk;
use crate::server::AppContext;

async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")
}

fn connect_ollama(config: &Config) -> Result<OllamaClient> {
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;

    if let Err(e) = client.health_check() {
        error!("❌ Ollama is not ready: {:#}", e);
        println!(
            "Error: Ollama at {} is not ready for model {}",
            client.base_url(),
            config.ollama.embedding_model
        );
        println!("Please ensure Ollama is running and the model is pulled.");
        println!("Use 'arxiv-rag config' to update connection settings.");
        return Err(e);
    }

    info!(
        "✅ Ollama connected at {} with model {}",
        client.base_url(),
        client.model()
    );
    Ok(client)
}

/// Filter the arXiv snapshot and load the selected papers
#[inline]
pub async fn collect(config: &Config, snapshot: Option<PathBuf>) -> Result<LoadSummary> {
    let Some(snapshot_path) = snapshot.or_else(|| config.ingest.snapshot_path.clone()) else {
        bail!("No snapshot given; pass --snapshot or set ingest.snapshot_path in config.toml");
    };

    println!("📥 Reading snapshot {}", snapshot_path.display());
    let database = open_database(config).await?;
    let summary = Ingestor::new(database, config)
        .load_snapshot(&snapshot_path)
        .await?;

    println!("Snapshot processed:");
    println!("  Lines read: {}", summary.snapshot.lines);
    println!("  Matching papers: {}", summary.snapshot.kept);
    println!("  Malformed lines: {}", summary.snapshot.malformed);
    println!("  Selected: {}", summary.selected);
    println!("  Inserted: {}", summary.inserted);
    println!("  Already present: {}", summary.skipped);
    Ok(summary)
}

/// Split every paper without chunks into overlapping word windows
#[inline]
pub async fn chunk(config: &Config) -> Result<ChunkSummary> {
    let database = open_database(config).await?;
    let summary = Ingestor::new(database, config).chunk_documents().await?;

    println!("✂️  Chunking complete:");
    println!("  Papers processed: {}", summary.documents);
    println!("  Chunks created: {}", summary.chunks);
    println!("  Too short to chunk: {}", summary.empty_documents);
    Ok(summary)
}

/// Embed all chunks through Ollama and stage the vectors
#[inline]
pub async fn embed(config: &Config) -> Result<EmbeddingStats> {
    let client = connect_ollama(config)?;
    let database = open_database(config).await?;

    let stats = Indexer::new(database, Arc::new(client), config)
        .generate_embeddings()
        .await?;

    println!("🧮 Embeddings generated:");
    println!("  Chunks embedded: {}", stats.chunks_embedded);
    println!("  Dimension: {}", stats.dimension);
    println!("  Batches: {}", stats.batches);
    println!("  Saved to: {}", config.embeddings_path().display());
    Ok(stats)
}

/// Build the search index from staged embeddings
#[inline]
pub async fn build_index(config: &Config) -> Result<IndexStats> {
    let database = open_database(config).await?;
    // Index building never calls the embedder
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;

    let stats = Indexer::new(database, Arc::new(client), config)
        .build_index()
        .await?;

    println!("🗂️  Index built:");
    println!("  Vectors: {}", stats.vectors);
    println!("  Dimension: {}", stats.dimension);
    println!(
        "  Self-test: {}",
        if stats.self_test_passed { "passed" } else { "FAILED" }
    );
    println!("  Alignment: {}", stats.consistency.summary());
    println!("  Saved to: {}", config.index_path().display());

    if !stats.consistency.is_consistent {
        bail!("Index is not aligned with the chunk store; rerun the embed stage");
    }
    Ok(stats)
}

/// Run every offline stage in order
#[inline]
pub async fn ingest(config: &Config, snapshot: Option<PathBuf>) -> Result<()> {
    collect(config, snapshot).await?;
    chunk(config).await?;
    embed(config).await?;
    build_index(config).await?;
    println!("✅ Ingestion complete");
    Ok(())
}

fn print_sources(sources: &[RetrievedChunk]) {
    for source in sources {
        println!();
        println!(
            "{}. {} (similarity {:.4})",
            source.rank, source.title, source.similarity
        );
        println!("   Paper: {} [{}]", source.document_id, source.categories);
        println!("   Authors: {}", source.authors);
        println!("   {}", source.chunk_text);
    }
}

/// Print the chunks most similar to `query`
#[inline]
pub async fn search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let context = AppContext::load(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let sources = context.pipeline().retriever().search(query, top_k).await?;
    if sources.is_empty() {
        println!("No matching papers found.");
        return Ok(());
    }

    println!("🔍 Top {} results for: {}", sources.len(), query);
    print_sources(&sources);
    Ok(())
}

/// Answer `query` from the indexed papers
#[inline]
pub async fn ask(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let context = AppContext::load(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let answer = context.pipeline().ask(query, top_k).await?;

    println!("{}", answer.response);
    println!();
    println!("Sources:");
    print_sources(&answer.sources);
    println!();
    println!(
        "⏱️  Retrieval {}ms, generation {}ms, total {}ms",
        answer.retrieval_time_ms, answer.generation_time_ms, answer.total_time_ms
    );
    if answer.query_id.is_none() {
        warn!("This answer was not recorded in the query log");
    }
    Ok(())
}

/// Show dataset, index and Ollama status
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 arXiv RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Database Status:");
    let database = match open_database(config).await {
        Ok(database) => {
            println!("   ✅ SQLite: {}", config.database_path().display());
            Some(database)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to open - {:#}", e);
            None
        }
    };

    if let Some(database) = &database {
        let stats = database
            .statistics(10)
            .await
            .context("Failed to gather statistics")?;
        println!("   📄 Papers: {}", stats.documents);
        println!(
            "   ✂️  Chunks: {} ({} embedded, {:.1}%)",
            stats.chunks,
            stats.embedded_chunks,
            stats.embedding_coverage()
        );
        println!("   💬 Queries logged: {}", stats.queries);
        println!("   🧾 Retrieval log entries: {}", stats.retrieval_logs);
        if let (Some(earliest), Some(latest)) = (stats.earliest_update, stats.latest_update) {
            println!("   📅 Update dates: {} to {}", earliest, latest);
        }
        if let Some(mean) = stats.mean_word_count {
            println!("   📏 Mean abstract length: {:.1} words", mean);
        }
        if !stats.top_categories.is_empty() {
            println!("   🏷️  Top categories:");
            for entry in &stats.top_categories {
                println!("      {:<12} {}", entry.category, entry.count);
            }
        }
    }

    println!();
    println!("🗂️  Index Status:");
    let index_path = config.index_path();
    if index_path.exists() {
        match VectorIndex::load(&index_path) {
            Ok(index) => {
                println!(
                    "   ✅ {} vectors of dimension {}",
                    index.len(),
                    index.dimension()
                );
                if let Some(database) = &database {
                    match ConsistencyValidator::new(database, &index)
                        .validate_consistency()
                        .await
                    {
                        Ok(report) if report.is_consistent => {
                            println!("   ✅ {}", report.summary());
                        }
                        Ok(report) => println!("   ⚠️  {}", report.summary()),
                        Err(e) => println!("   ⚠️  Alignment check failed - {:#}", e),
                    }
                }
            }
            Err(e) => println!("   ❌ Failed to load {} - {}", index_path.display(), e),
        }
    } else {
        println!("   💤 No index yet; run 'arxiv-rag build-index'");
    }

    println!();
    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!("   ✅ Connected at {}", client.base_url());
                println!("   📋 Embedding model: {}", config.ollama.embedding_model);
                println!("   📋 Generation model: {}", config.ollama.generation_model);
            }
            Err(e) => println!("   ⚠️  Ollama: Not ready - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }

    Ok(())
}

/// Delete a paper with its chunks and retrieval log entries
#[inline]
pub async fn delete_document(config: &Config, document_id: &str, assume_yes: bool) -> Result<()> {
    let database = open_database(config).await?;

    let Some(document) = database.get_document(document_id).await? else {
        bail!("Paper not found: {}", document_id);
    };
    let chunks = database.list_chunks_for_document(document_id).await?;

    println!("Found paper: {} ({})", document.title, document.document_id);
    println!(
        "This will delete the paper, its {} chunks and their retrieval log entries.",
        chunks.len()
    );

    if !assume_yes
        && !Confirm::new()
            .with_prompt("Delete this paper? This action cannot be undone.")
            .default(false)
            .interact()?
    {
        println!("Deletion cancelled.");
        return Ok(());
    }

    database.delete_document(document_id).await?;
    println!("✓ Paper deleted: {}", document.document_id);
    if chunks.iter().any(|chunk| chunk.is_embedded()) {
        println!("Its vectors stay in the index until the next build-index run.");
    }
    Ok(())
}
