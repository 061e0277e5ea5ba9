#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use arxiv_rag::config::OllamaConfig;
use arxiv_rag::database::vector_index::{VectorIndex, normalize};
use arxiv_rag::embeddings::ollama::OllamaClient;
use arxiv_rag::generation::{Generator, OllamaGenerator};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn integration_config() -> OllamaConfig {
    let defaults = OllamaConfig::default();
    OllamaConfig {
        host: env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string()),
        port: env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_OLLAMA_PORT),
        embedding_model: env::var("OLLAMA_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
        generation_model: env::var("OLLAMA_GENERATION_MODEL")
            .unwrap_or(defaults.generation_model),
        batch_size: 5,
        ..OllamaConfig::default()
    }
}

fn create_integration_test_client() -> OllamaClient {
    OllamaClient::new(&integration_config())
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(3)
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();

    info!("Testing health check against real Ollama instance");
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_batch_embeddings() {
    init_test_tracing();

    let client = create_integration_test_client();
    let config = integration_config();

    let texts = vec![
        "Graph neural networks for molecular property prediction.".to_string(),
        "Transformers for low-resource machine translation.".to_string(),
        "Convex relaxations for sparse regression problems.".to_string(),
        "Quantum error correction with surface codes.".to_string(),
        "Reinforcement learning for robotic grasping.".to_string(),
        "Federated optimization under heterogeneous data.".to_string(),
        "Diffusion models for image super-resolution.".to_string(),
    ];

    let result = client.generate_embeddings_batch(&texts);
    assert!(result.is_ok(), "Batch embedding should succeed: {:?}", result);

    let embeddings = result.expect("embeddings generated");
    assert_eq!(embeddings.len(), texts.len());
    for (i, embedding) in embeddings.iter().enumerate() {
        assert_eq!(
            embedding.len(),
            config.embedding_dimension as usize,
            "Embedding {} should match the configured dimension",
            i
        );
        debug!("Embedding {}: {} dimensions", i, embedding.len());
    }
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_nearest_neighbour() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts = vec![
        "Protein structure prediction with deep learning.".to_string(),
        "Byzantine fault tolerant consensus protocols.".to_string(),
        "Galaxy cluster mass estimation from weak lensing.".to_string(),
    ];
    let embeddings = client
        .generate_embeddings_batch(&texts)
        .expect("embeddings generated");

    let dimension = embeddings[0].len();
    let mut index = VectorIndex::new(dimension).expect("valid dimension");
    index
        .add(&embeddings, &[1, 2, 3])
        .expect("vectors should be accepted");

    let mut query = client
        .generate_embedding("distributed consensus under byzantine failures")
        .expect("query embedded");
    normalize(&mut query);

    let hits = index.search(&query, 3).expect("search succeeds");
    info!("Hits: {:?}", hits);
    assert_eq!(hits[0].chunk_id, 2);
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_generation() {
    init_test_tracing();

    let generator = OllamaGenerator::new(&integration_config())
        .expect("Failed to create generator")
        .with_timeout(Duration::from_secs(300));

    let answer = generator.generate("Reply with the single word: ready");
    assert!(answer.is_ok(), "Generation should succeed: {:?}", answer);
    assert!(!answer.expect("answer generated").trim().is_empty());
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_empty_input() {
    init_test_tracing();

    let client = create_integration_test_client();

    let result = client.generate_embeddings_batch(&[]);
    assert!(result.is_ok(), "Empty batch should be handled gracefully");
    assert!(
        result.expect("embedding result succeeded").is_empty(),
        "Empty batch should return empty results"
    );
}
