// HTTP server
// JSON endpoints for asking questions and searching the loaded index

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::{Config, RetrievalConfig};
use crate::database::sqlite::Database;
use crate::database::vector_index::VectorIndex;
use crate::embeddings::OllamaClient;
use crate::generation::OllamaGenerator;
use crate::rag::{AnswerComposer, RagAnswer, RagPipeline};
use crate::retrieval::{RetrievedChunk, Retriever};
use crate::{RagError, Result};

/// Everything a request handler needs, built once at startup and shared
pub struct AppContext {
    pipeline: RagPipeline,
    default_top_k: usize,
    max_top_k: usize,
    embedding_model: String,
    generation_model: String,
}

impl AppContext {
    #[inline]
    pub fn new(pipeline: RagPipeline, retrieval: &RetrievalConfig) -> Self {
        Self {
            pipeline,
            default_top_k: retrieval.top_k,
            max_top_k: retrieval.max_top_k,
            embedding_model: String::new(),
            generation_model: String::new(),
        }
    }

    #[inline]
    pub fn with_model_names(mut self, embedding_model: &str, generation_model: &str) -> Self {
        self.embedding_model = embedding_model.to_string();
        self.generation_model = generation_model.to_string();
        self
    }

    /// Open the store, load the index and verify they agree before serving
    #[inline]
    pub async fn load(config: &Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        let index_path = config.index_path();
        let index = VectorIndex::load(&index_path)?;
        let expected_dimension = config.ollama.embedding_dimension as usize;
        if index.dimension() != expected_dimension {
            return Err(RagError::IndexMismatch(format!(
                "index at {} has dimension {}, configuration expects {}",
                index_path.display(),
                index.dimension(),
                expected_dimension
            )));
        }
        info!(
            "Loaded index with {} vectors from {}",
            index.len(),
            index_path.display()
        );

        let embedder = OllamaClient::new(&config.ollama)
            .map_err(|e| RagError::Config(format!("{e:#}")))?
            .with_retry_attempts(1);
        let generator = OllamaGenerator::new(&config.ollama)
            .map_err(|e| RagError::Config(format!("{e:#}")))?;

        let retriever = Retriever::new(Arc::new(embedder), Arc::new(index), database.clone());
        let report = retriever.verify_alignment().await?;
        info!("{}", report.summary());

        let composer = AnswerComposer::new(Arc::new(generator), database);
        Ok(Self::new(RagPipeline::new(retriever, composer), &config.retrieval)
            .with_model_names(&config.ollama.embedding_model, &config.ollama.generation_model))
    }

    #[inline]
    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }

    fn resolve_top_k(&self, requested: Option<i64>) -> std::result::Result<usize, ApiError> {
        let Some(requested) = requested else {
            return Ok(self.default_top_k);
        };
        let top_k = usize::try_from(requested).map_err(|_| {
            ApiError::BadRequest(format!("top_k must be a positive integer, got {requested}"))
        })?;
        Ok(top_k.min(self.max_top_k))
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub top_k: Option<i64>,
}

impl QueryRequest {
    fn query_text(&self) -> std::result::Result<&str, ApiError> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .ok_or_else(|| ApiError::BadRequest("No query provided".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub sources: Vec<RetrievedChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub indexed_vectors: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub generation_model: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Rag(RagError),
}

impl From<RagError> for ApiError {
    #[inline]
    fn from(err: RagError) -> Self {
        ApiError::Rag(err)
    }
}

impl From<JsonRejection> for ApiError {
    #[inline]
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Rag(RagError::InvalidArgument(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Rag(RagError::Embedding(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Rag(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Rag(RagError::InvalidArgument(message)) => message.clone(),
            ApiError::Rag(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        if status.is_server_error() {
            error!("Request failed with {}: {}", status, message);
        } else {
            debug!("Rejected request: {}", message);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[inline]
pub fn router(context: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(ask))
        .route("/search", post(search))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(context)
}

async fn ask(
    State(context): State<Arc<AppContext>>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> std::result::Result<Json<RagAnswer>, ApiError> {
    let Json(request) = payload?;
    let query = request.query_text()?;
    let top_k = context.resolve_top_k(request.top_k)?;

    let answer = context.pipeline.ask(query, top_k).await?;
    Ok(Json(answer))
}

async fn search(
    State(context): State<Arc<AppContext>>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> std::result::Result<Json<SearchResponse>, ApiError> {
    let Json(request) = payload?;
    let query = request.query_text()?;
    let top_k = context.resolve_top_k(request.top_k)?;

    let sources = context.pipeline.retriever().search(query, top_k).await?;
    Ok(Json(SearchResponse {
        query: query.to_string(),
        sources,
    }))
}

async fn health(State(context): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let index = context.pipeline.retriever().index();
    Json(HealthResponse {
        status: "ok".to_string(),
        indexed_vectors: index.len(),
        dimension: index.dimension(),
        embedding_model: context.embedding_model.clone(),
        generation_model: context.generation_model.clone(),
    })
}

/// Load the serving context and run until interrupted
#[inline]
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let context = AppContext::load(config)
        .await
        .context("Failed to prepare the serving context")?;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, router(Arc::new(context)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
