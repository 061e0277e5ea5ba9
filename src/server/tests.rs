use super::*;
use crate::testing::{
    FailingEmbedder, FixedGenerator, KEYWORDS, KeywordEmbedder, UnreachableGenerator, seed_corpus,
};
use axum::body::{Body, to_bytes};
use axum::http::Request;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

async fn app_with(
    embedder: Option<Arc<dyn crate::embeddings::Embedder>>,
    generator: Arc<dyn crate::generation::Generator>,
) -> anyhow::Result<(TempDir, Router)> {
    let temp_dir = TempDir::new()?;
    let keywords = Arc::new(KeywordEmbedder::new(KEYWORDS));
    let (database, index) = seed_corpus(temp_dir.path(), &keywords).await?;
    let embedder = embedder.unwrap_or(keywords);

    let retriever = Retriever::new(embedder, index, database.clone());
    let composer = AnswerComposer::new(generator, database);
    let context = AppContext::new(
        RagPipeline::new(retriever, composer),
        &RetrievalConfig::default(),
    )
    .with_model_names("keyword-test", "fixed-test");
    Ok((temp_dir, router(Arc::new(context))))
}

async fn app() -> anyhow::Result<(TempDir, Router)> {
    app_with(None, Arc::new(FixedGenerator::new("A grounded answer."))).await
}

async fn post_json(app: Router, uri: &str, body: &str) -> anyhow::Result<(StatusCode, Value)> {
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

#[tokio::test]
async fn ask_returns_answer_with_sources() -> anyhow::Result<()> {
    let (_temp_dir, app) = app().await?;

    let (status, body) = post_json(app, "/ask", r#"{"query": "quantum codes", "top_k": 2}"#).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "quantum codes");
    assert_eq!(body["response"], "A grounded answer.");
    assert_eq!(body["sources"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["sources"][0]["rank"], 1);
    assert_eq!(body["sources"][0]["document_id"], "d2");
    assert!(body["query_id"].is_i64());
    assert!(body["total_time_ms"].is_u64());
    Ok(())
}

#[tokio::test]
async fn ask_uses_default_top_k() -> anyhow::Result<()> {
    let (_temp_dir, app) = app().await?;

    let (status, body) = post_json(app, "/ask", r#"{"query": "graph"}"#).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sources"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[tokio::test]
async fn missing_or_blank_query_is_bad_request() -> anyhow::Result<()> {
    for body in [r#"{}"#, r#"{"query": ""}"#, r#"{"query": "   "}"#] {
        let (_temp_dir, app) = app().await?;
        let (status, response) = post_json(app, "/ask", body).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert_eq!(response["error"], "No query provided");
    }
    Ok(())
}

#[tokio::test]
async fn invalid_top_k_is_bad_request() -> anyhow::Result<()> {
    for body in [
        r#"{"query": "graph", "top_k": -1}"#,
        r#"{"query": "graph", "top_k": 0}"#,
    ] {
        let (_temp_dir, app) = app().await?;
        let (status, response) = post_json(app, "/search", body).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert!(response["error"].is_string());
    }
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_bad_request() -> anyhow::Result<()> {
    let (_temp_dir, app) = app().await?;

    let (status, response) = post_json(app, "/ask", "{not json").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn unreachable_generator_still_answers() -> anyhow::Result<()> {
    let (_temp_dir, app) = app_with(None, Arc::new(UnreachableGenerator)).await?;

    let (status, body) = post_json(app, "/ask", r#"{"query": "graph"}"#).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Error calling Ollama: connection refused");
    Ok(())
}

#[tokio::test]
async fn embedding_failure_is_bad_gateway() -> anyhow::Result<()> {
    let (_temp_dir, app) = app_with(
        Some(Arc::new(FailingEmbedder)),
        Arc::new(FixedGenerator::new("unused")),
    )
    .await?;

    let (status, body) = post_json(app, "/ask", r#"{"query": "graph"}"#).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|message| message.contains("embedding service unavailable"))
    );
    Ok(())
}

#[tokio::test]
async fn search_skips_generation() -> anyhow::Result<()> {
    let (_temp_dir, app) = app().await?;

    let (status, body) = post_json(app, "/search", r#"{"query": "quantum", "top_k": 1}"#).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "quantum");
    assert_eq!(body["sources"][0]["title"], "Quantum Codes");
    assert!(body.get("response").is_none());
    Ok(())
}

#[tokio::test]
async fn health_reports_index() -> anyhow::Result<()> {
    let (_temp_dir, app) = app().await?;

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let health: HealthResponse = serde_json::from_slice(&bytes)?;
    assert_eq!(health.status, "ok");
    assert_eq!(health.indexed_vectors, 3);
    assert_eq!(health.dimension, KEYWORDS.len() + 1);
    assert_eq!(health.embedding_model, "keyword-test");
    Ok(())
}

#[tokio::test]
async fn load_rejects_missing_index() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let config = Config::with_base_dir(temp_dir.path());

    let result = AppContext::load(&config).await;
    assert!(matches!(result, Err(RagError::Io(_))));
    Ok(())
}
