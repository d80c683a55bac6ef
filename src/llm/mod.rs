pub mod chat;

use thiserror::Error;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Failures of a call to the inference server.
///
/// `Model` means the server answered and rejected the request; `Connection`
/// covers everything else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("Failed to connect to Ollama: {0}")]
    Connection(String),
    #[error("Ollama model error: {0}")]
    Model(String),
}

impl LlmError {
    pub fn reason(&self) -> &str {
        match self {
            LlmError::Connection(reason) | LlmError::Model(reason) => reason,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Connection(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub completion_model: String,
}
