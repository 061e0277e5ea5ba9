#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end pipeline against a mocked Ollama server:
// snapshot -> papers -> chunks -> embeddings -> index -> HTTP answers

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use arxiv_rag::config::Config;
use arxiv_rag::database::sqlite::Database;
use arxiv_rag::embeddings::ollama::OllamaClient;
use arxiv_rag::indexer::Indexer;
use arxiv_rag::ingest::Ingestor;
use arxiv_rag::server::{AppContext, router};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

const KEYWORDS: &[&str] = &["graph", "quantum", "language"];

/// Answers `/api/embed` with keyword-count vectors for each input
struct KeywordEmbeddings;

fn vectorize(text: &str) -> Vec<f32> {
    let lowered = text.to_lowercase();
    let mut vector: Vec<f32> = KEYWORDS
        .iter()
        .map(|keyword| lowered.matches(keyword).count() as f32)
        .collect();
    vector.push(0.1);
    vector
}

impl Respond for KeywordEmbeddings {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let inputs: Vec<&str> = match &body["input"] {
            Value::String(text) => vec![text.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        let embeddings: Vec<Vec<f32>> = inputs.into_iter().map(vectorize).collect();
        ResponseTemplate::new(200).set_body_json(json!({
            "model": "all-minilm:latest",
            "embeddings": embeddings
        }))
    }
}

fn paper(id: &str, categories: &str, date: &str, topic: &str) -> Value {
    let filler: Vec<String> = (0..30).map(|i| format!("term{i}")).collect();
    json!({
        "id": id,
        "title": format!("A study of {topic}"),
        "authors": "A. Author and B. Author",
        "categories": categories,
        "abstract": format!("We study {topic} in depth. {} {topic}.", filler.join(" ")),
        "update_date": date
    })
}

async fn mock_ollama() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(KeywordEmbeddings)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "mistral:latest",
            "response": "According to Paper 1, quantum codes protect states.",
            "done": true
        })))
        .mount(&server)
        .await;

    server
}

fn config_for(data_dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config::with_base_dir(data_dir.path());
    let address = server.address();
    config.ollama.host = address.ip().to_string();
    config.ollama.port = address.port();
    config.ollama.embedding_dimension = (KEYWORDS.len() + 1) as u32;
    config.ollama.batch_size = 2;
    config
}

async fn post(app: axum::Router, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_to_answer() -> Result<()> {
    let server = mock_ollama().await;
    let data_dir = TempDir::new()?;
    let config = config_for(&data_dir, &server);

    let snapshot_path = data_dir.path().join("snapshot.json");
    let mut file = std::fs::File::create(&snapshot_path)?;
    for record in [
        paper("2101.00001", "cs.LG", "2021-02-01", "graph networks"),
        paper("2101.00002", "cs.CL cs.LG", "2022-03-01", "language models"),
        paper("2101.00003", "quant-ph cs.IT", "2023-04-01", "quantum codes"),
        paper("2101.00004", "math.AG", "2023-04-01", "quantum groups"),
        paper("1901.00005", "cs.LG", "2019-01-01", "graph kernels"),
    ] {
        writeln!(file, "{record}")?;
    }
    drop(file);

    let database = Database::initialize_from_config_dir(data_dir.path()).await?;
    let ingestor = Ingestor::new(database.clone(), &config).with_progress(false);

    let loaded = ingestor.load_snapshot(&snapshot_path).await?;
    assert_eq!(loaded.snapshot.kept, 3);
    assert_eq!(loaded.inserted, 3);

    let chunked = ingestor.chunk_documents().await?;
    assert_eq!(chunked.documents, 3);
    assert_eq!(chunked.chunks, 3);

    let client = OllamaClient::new(&config.ollama)?;
    let indexer = Indexer::new(database.clone(), Arc::new(client), &config).with_progress(false);
    let embedded = indexer.generate_embeddings().await?;
    assert_eq!(embedded.chunks_embedded, 3);
    assert_eq!(embedded.batches, 2);

    let built = indexer.build_index().await?;
    assert!(built.self_test_passed);
    assert!(built.consistency.is_consistent);

    let context = AppContext::load(&config).await?;
    let app = router(Arc::new(context));

    let (status, body) = post(
        app.clone(),
        "/ask",
        json!({"query": "How do quantum codes work?", "top_k": 2}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["response"],
        "According to Paper 1, quantum codes protect states."
    );
    assert_eq!(body["sources"][0]["document_id"], "2101.00003");
    assert_eq!(body["sources"][0]["rank"], 1);
    assert_eq!(body["sources"][1]["rank"], 2);

    let query_id = body["query_id"].as_i64().expect("query should be logged");
    let logs = database.retrieval_logs_for_query(query_id).await?;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].document_id, "2101.00003");

    let (status, body) = post(app, "/search", json!({"query": "graph"})).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sources"][0]["document_id"], "2101.00001");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_index_is_rejected_at_startup() -> Result<()> {
    let server = mock_ollama().await;
    let data_dir = TempDir::new()?;
    let config = config_for(&data_dir, &server);

    let snapshot_path = data_dir.path().join("snapshot.json");
    let mut file = std::fs::File::create(&snapshot_path)?;
    writeln!(
        file,
        "{}",
        paper("2101.00001", "cs.LG", "2021-02-01", "graph networks")
    )?;
    writeln!(
        file,
        "{}",
        paper("2101.00002", "cs.CL", "2022-03-01", "language models")
    )?;
    drop(file);

    let database = Database::initialize_from_config_dir(data_dir.path()).await?;
    let ingestor = Ingestor::new(database.clone(), &config).with_progress(false);
    ingestor.load_snapshot(&snapshot_path).await?;
    ingestor.chunk_documents().await?;

    let indexer = Indexer::new(
        database.clone(),
        Arc::new(OllamaClient::new(&config.ollama)?),
        &config,
    )
    .with_progress(false);
    indexer.generate_embeddings().await?;
    indexer.build_index().await?;

    // A later embed run renumbers positions without rebuilding the index
    database.delete_document("2101.00001").await?;
    indexer.generate_embeddings().await?;

    let result = AppContext::load(&config).await;
    assert!(matches!(
        result,
        Err(arxiv_rag::RagError::IndexMismatch(_))
    ));
    Ok(())
}
