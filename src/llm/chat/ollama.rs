use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, Response };
use serde::{ Deserialize, Serialize };
use url::Url;

use super::{ create_streaming_response, ChatClient, ChatStream, FragmentSender };
use crate::llm::{ LlmConfig, LlmError };
use crate::models::chat::ChatMessage;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize, Default)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

/// One reply object: the whole answer when not streaming, one line of the
/// NDJSON body when streaming.
#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, PartialEq, Eq)]
enum StreamLine {
    Skip,
    Fragment(String),
    Done(Option<String>),
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| crate::llm::DEFAULT_MODEL.to_string());
        let url = base_url.unwrap_or_else(|| crate::llm::DEFAULT_OLLAMA_URL.into());

        Self {
            http: HttpClient::new(),
            base_url: url.trim_end_matches('/').to_string(),
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Url::parse(&config.base_url).map_err(|e|
            LlmError::Connection(format!("invalid Ollama URL '{}': {}", config.base_url, e))
        )?;

        Ok(Self::new(Some(config.base_url.clone()), Some(config.completion_model.clone())))
    }

    async fn post_chat(&self, messages: &[ChatMessage], stream: bool) -> Result<Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatBody {
            model: &self.completion_model,
            messages,
            stream,
        };
        debug!("POST {} (model: {}, stream: {})", url, self.completion_model, stream);
        let response = self.http.post(&url).json(&body).send().await?;
        ensure_success(response).await
    }

    async fn relay_lines(response: Response, tx: FragmentSender) {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    info!("Stream consumer went away; dropping Ollama response");
                    return;
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        if !Self::forward_line(&line, &tx).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Ollama stream read failed: {}", e);
                    let _ = tx.send(Err(LlmError::from(e))).await;
                    return;
                }
                None => {
                    if !buffer.is_empty() {
                        Self::forward_line(&buffer, &tx).await;
                    }
                    return;
                }
            }
        }
    }

    /// Returns false once the stream is finished, failed, or unobserved.
    async fn forward_line(line: &[u8], tx: &FragmentSender) -> bool {
        match parse_stream_line(line) {
            Ok(StreamLine::Skip) => true,
            Ok(StreamLine::Fragment(text)) => tx.send(Ok(text)).await.is_ok(),
            Ok(StreamLine::Done(last)) => {
                if let Some(text) = last {
                    let _ = tx.send(Ok(text)).await;
                }
                false
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                false
            }
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let reason = serde_json
        ::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or_else(|_| if text.trim().is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            text.trim().to_string()
        });
    Err(LlmError::Model(format!("{} (status code: {})", reason, status.as_u16())))
}

fn parse_stream_line(line: &[u8]) -> Result<StreamLine, LlmError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| LlmError::Connection(format!("invalid UTF-8 in stream: {}", e)))?
        .trim();
    if text.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let reply: ChatReply = serde_json
        ::from_str(text)
        .map_err(|e| LlmError::Connection(format!("invalid stream line '{}': {}", text, e)))?;
    if let Some(error) = reply.error {
        return Err(LlmError::Model(error));
    }

    let content = reply.message.unwrap_or_default().content;
    let fragment = if content.is_empty() { None } else { Some(content) };
    Ok(match (fragment, reply.done) {
        (last, true) => StreamLine::Done(last),
        (Some(text), false) => StreamLine::Fragment(text),
        (None, false) => StreamLine::Skip,
    })
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await?;
        let response = ensure_success(response).await.map_err(|e|
            LlmError::Connection(e.reason().to_string())
        )?;
        let tags = response.json::<TagsResponse>().await?;
        Ok(
            tags.models
                .into_iter()
                .map(|m| m.name)
                .collect()
        )
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let response = self.post_chat(messages, false).await?;
        let reply = response.json::<ChatReply>().await?;
        if let Some(error) = reply.error {
            return Err(LlmError::Model(error));
        }
        let content = reply.message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::Connection("reply carried no message".to_string()))?;
        info!("Ollama response length: {} characters", content.chars().count());
        Ok(content)
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, LlmError> {
        let response = self.post_chat(messages, true).await?;
        Ok(create_streaming_response(move |tx| Self::relay_lines(response, tx)))
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }
}
