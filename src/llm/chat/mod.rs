pub mod ollama;

use async_trait::async_trait;
use futures::{ Future, Stream };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ LlmConfig, LlmError };
use self::ollama::OllamaClient;
use crate::models::chat::{ ChatMessage, HealthStatus };

/// Forward-only sequence of non-empty text fragments.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

pub type FragmentSender = mpsc::Sender<Result<String, LlmError>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Names of the models installed on the inference server.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, LlmError>;

    fn get_model(&self) -> String;

    /// Healthy when an installed model name starts with the configured one,
    /// so `llama3.2` matches `llama3.2:latest`. Never fails.
    async fn check_health(&self) -> HealthStatus {
        let target = self.get_model();
        match self.list_models().await {
            Ok(models) => {
                let found = models.iter().any(|name| name.starts_with(&target));
                let message = if found {
                    format!("Model '{}' is ready", target)
                } else {
                    format!("Model '{}' not found", target)
                };
                HealthStatus { healthy: found, message, models }
            }
            Err(e) =>
                HealthStatus {
                    healthy: false,
                    message: format!("Ollama connection failed: {}", e.reason()),
                    models: Vec::new(),
                },
        }
    }
}

/// Runs `response_fn` on its own task and exposes what it sends as a stream.
/// Dropping the stream closes the channel, which the producer observes.
pub fn create_streaming_response<F, Fut>(response_fn: F) -> ChatStream
    where
        F: FnOnce(FragmentSender) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client = OllamaClient::from_config(config)?;
    Ok(Arc::new(client))
}
