use super::*;
use crate::testing::{FailingEmbedder, KEYWORDS, KeywordEmbedder, seed_corpus};
use tempfile::TempDir;

async fn retriever_with_database()
-> anyhow::Result<(TempDir, Arc<KeywordEmbedder>, Database, Retriever)> {
    let temp_dir = TempDir::new()?;
    let embedder = Arc::new(KeywordEmbedder::new(KEYWORDS));
    let (database, index) = seed_corpus(temp_dir.path(), &embedder).await?;
    let retriever = Retriever::new(embedder.clone(), index, database.clone());
    Ok((temp_dir, embedder, database, retriever))
}

async fn retriever() -> anyhow::Result<(TempDir, Arc<KeywordEmbedder>, Retriever)> {
    let (temp_dir, embedder, _database, retriever) = retriever_with_database().await?;
    Ok((temp_dir, embedder, retriever))
}

#[tokio::test]
async fn most_similar_chunk_ranks_first() -> anyhow::Result<()> {
    let (_temp_dir, _embedder, retriever) = retriever().await?;

    let results = retriever.search("quantum states", 2).await?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].document_id, "d2");
    assert_eq!(results[0].title, "Quantum Codes");
    assert_eq!(results[1].rank, 2);
    assert_eq!(results[1].document_id, "d1");
    assert!(results[0].similarity >= results[1].similarity);
    Ok(())
}

#[tokio::test]
async fn large_top_k_returns_every_chunk_in_order() -> anyhow::Result<()> {
    let (_temp_dir, _embedder, retriever) = retriever().await?;

    let results = retriever.search("graph language", 50).await?;
    assert_eq!(results.len(), 3);

    let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert!(
        results
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity)
    );
    assert!(results.iter().all(|r| r.similarity <= 1.0 + 1e-5));
    Ok(())
}

#[tokio::test]
async fn repeated_search_is_deterministic() -> anyhow::Result<()> {
    let (_temp_dir, _embedder, retriever) = retriever().await?;

    let first = retriever.search("graph neural networks", 3).await?;
    let second = retriever.search("graph neural networks", 3).await?;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_embedding() -> anyhow::Result<()> {
    let (_temp_dir, embedder, retriever) = retriever().await?;
    let calls_before = embedder.calls();

    let zero = retriever.search("graph", 0).await;
    assert!(matches!(zero, Err(RagError::InvalidArgument(_))));

    let blank = retriever.search("   ", 3).await;
    assert!(matches!(blank, Err(RagError::InvalidArgument(_))));

    assert_eq!(embedder.calls(), calls_before);
    Ok(())
}

#[tokio::test]
async fn deleted_papers_drop_out_with_dense_ranks() -> anyhow::Result<()> {
    let (_temp_dir, _embedder, database, retriever) = retriever_with_database().await?;

    assert!(database.delete_document("d2").await?);

    let results = retriever.search("quantum", 3).await?;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.document_id == "d1"));
    let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn embedder_failure_is_reported() -> anyhow::Result<()> {
    let (_temp_dir, _embedder, retriever) = retriever().await?;
    let failing = Retriever::new(
        Arc::new(FailingEmbedder),
        Arc::clone(&retriever.index),
        retriever.database.clone(),
    );

    let result = failing.search("graph", 3).await;
    assert!(matches!(result, Err(RagError::Embedding(_))));
    Ok(())
}

#[tokio::test]
async fn empty_index_returns_nothing() -> anyhow::Result<()> {
    let (_temp_dir, embedder, retriever) = retriever().await?;
    let empty = Retriever::new(
        embedder.clone(),
        Arc::new(VectorIndex::new(embedder.dimension())?),
        retriever.database.clone(),
    );

    assert!(empty.search("graph", 5).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn alignment_is_verified() -> anyhow::Result<()> {
    let (_temp_dir, embedder, retriever) = retriever().await?;

    let report = retriever.verify_alignment().await?;
    assert!(report.is_consistent);
    assert_eq!(report.positioned_chunks, 3);

    // Same vectors with the chunk-id table reversed
    let mut ids = retriever.index().chunk_ids().to_vec();
    ids.reverse();
    let vectors: Vec<Vec<f32>> = (0..ids.len())
        .filter_map(|position| retriever.index().vector(position).map(<[f32]>::to_vec))
        .collect();
    let mut shuffled = VectorIndex::new(embedder.dimension())?;
    shuffled.add(&vectors, &ids)?;

    let misaligned = Retriever::new(
        embedder.clone(),
        Arc::new(shuffled),
        retriever.database.clone(),
    );
    let result = misaligned.verify_alignment().await;
    assert!(matches!(result, Err(RagError::IndexMismatch(_))));
    Ok(())
}
