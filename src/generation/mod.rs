// Answer generation
// Language-model seam used by the answer composer, and its Ollama implementation

pub mod ollama;

pub use ollama::OllamaGenerator;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Ollama returned status {0}")]
    Status(u16),
    #[error("Error calling Ollama: {0}")]
    Transport(String),
    #[error("Invalid response from Ollama: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Text returned to the user in place of an answer
    #[inline]
    pub fn placeholder_answer(&self) -> String {
        match self {
            GenerationError::Transport(_) => self.to_string(),
            GenerationError::Status(_) | GenerationError::InvalidResponse(_) => {
                format!("Error: {self}")
            }
        }
    }
}

/// Produces a completion for a fully assembled prompt
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}
