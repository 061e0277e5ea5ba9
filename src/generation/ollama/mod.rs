
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{GenerationError, Generator};
use crate::config::OllamaConfig;

#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.generation_timeout_secs)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.generation_model.clone(),
            agent,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    fn call(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = self
            .base_url
            .join("/api/generate")
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        debug!(
            "Requesting completion from {} with model {} (prompt length: {})",
            url,
            self.model,
            prompt.len()
        );

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|error| match error {
                ureq::Error::StatusCode(status) => GenerationError::Status(status),
                other => GenerationError::Transport(other.to_string()),
            })?;

        let response: GenerateResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        debug!("Received completion of {} bytes", response.response.len());
        Ok(response.response)
    }
}

impl Generator for OllamaGenerator {
    #[inline]
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.call(prompt).inspect_err(|e| {
            warn!("Generation with model {} failed: {}", self.model, e);
        })
    }

    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }
}
