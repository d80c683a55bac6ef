use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{ header, HeaderName, HeaderValue, StatusCode },
    response::{ sse::{ Event, Sse }, IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::{ stream, FutureExt, Stream, StreamExt };
use log::{ debug, error, info, warn };
use serde_json::Value;
use thiserror::Error;
use tower_http::cors::{ Any, CorsLayer };
use tower_http::services::{ ServeDir, ServeFile };
use uuid::Uuid;

use crate::config::prompt::PromptTemplate;
use crate::llm::chat::{ ChatClient, ChatStream };
use crate::llm::LlmError;
use crate::models::chat::{ ChatRequest, GenerateResponse };

pub const DEFAULT_MAX_INPUT_LENGTH: usize = 5000;
pub const DONE_MARKER: &str = "[DONE]";
pub const ERROR_MARKER: &str = "[ERROR]";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Llm(LlmError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Llm(LlmError::Model(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(GenerateResponse::failed(self.to_string()))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn ChatClient>,
    pub prompt: Arc<PromptTemplate>,
    pub max_input_length: usize,
}

impl AppState {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self {
            client,
            prompt: Arc::new(PromptTemplate::default()),
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
        }
    }

    /// Decodes the body and returns the trimmed input.
    pub fn validate(&self, body: &[u8]) -> Result<String, ApiError> {
        let missing = || ApiError::Validation("Missing 'user_input' field".to_string());
        let value: Value = serde_json::from_slice(body).map_err(|_| missing())?;
        if !value.is_object() {
            return Err(missing());
        }
        let request: ChatRequest = serde_json::from_value(value).map_err(|_| missing())?;
        let user_input = request.user_input.ok_or_else(missing)?;

        let trimmed = user_input.trim();
        if trimmed.is_empty() {
            return Err(ApiError::Validation("Input cannot be empty".to_string()));
        }

        let length = trimmed.chars().count();
        if length > self.max_input_length {
            return Err(
                ApiError::Validation(
                    format!(
                        "Input too long ({} chars). Maximum is {} characters.",
                        length,
                        self.max_input_length
                    )
                )
            );
        }

        Ok(trimmed.to_string())
    }
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/generate/stream", post(generate_stream_handler));

    if let Some(dir) = static_dir {
        app = app
            .route_service("/", ServeFile::new(dir.join("index.html")))
            .nest_service("/static", ServeDir::new(dir));
    }

    app.layer(cors).with_state(state)
}

pub async fn start_http_server(
    addr: SocketAddr,
    app: Router
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
        e
    })?;
    info!("HTTP server listening on: http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.client.check_health().await;
    let code = if status.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    if !status.healthy {
        warn!("Health check failed: {}", status.message);
    }
    (code, Json(status))
}

async fn generate_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();
    match generate(&state, &body, request_id).await {
        Ok(text) => Json(GenerateResponse::ok(text)).into_response(),
        Err(e) => {
            warn!("[{}] generate failed ({}): {}", request_id, e.status(), e);
            e.into_response()
        }
    }
}

async fn generate(state: &AppState, body: &[u8], request_id: Uuid) -> Result<String, ApiError> {
    let user_input = state.validate(body)?;
    info!("[{}] generate request ({} chars)", request_id, user_input.chars().count());

    let messages = state.prompt.build_messages(&user_input);
    // Runs in the request future: a client disconnect drops the upstream call with it.
    let text = AssertUnwindSafe(state.client.generate(&messages))
        .catch_unwind().await
        .map_err(|panic| ApiError::Unexpected(panic_message(panic.as_ref())))??;

    info!("[{}] generate complete ({} chars)", request_id, text.chars().count());
    Ok(text)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "client panicked".to_string()
    }
}

async fn generate_stream_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();
    let user_input = match state.validate(&body) {
        Ok(input) => input,
        Err(e) => {
            warn!("[{}] stream rejected: {}", request_id, e);
            return e.into_response();
        }
    };
    info!("[{}] stream request ({} chars)", request_id, user_input.chars().count());

    let messages = state.prompt.build_messages(&user_input);
    let fragments = match state.client.generate_stream(&messages).await {
        Ok(stream) => stream,
        Err(e) => stream::once(async move { Err::<String, _>(e) }).boxed(),
    };

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
    ];
    (headers, Sse::new(sse_relay(fragments, request_id))).into_response()
}

/// SSE cannot carry carriage returns; multi-line text becomes multiple `data:` lines.
fn data_event(text: &str) -> Event {
    Event::default().data(text.replace("\r\n", "\n").replace('\r', "\n"))
}

enum Relay {
    Streaming(ChatStream),
    Finished,
}

/// Re-frames fragments as SSE events, ending with `[DONE]` or `[ERROR] <message>`.
pub fn sse_relay(
    fragments: ChatStream,
    request_id: Uuid
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(Relay::Streaming(fragments), move |relay| async move {
        let Relay::Streaming(mut fragments) = relay else {
            return None;
        };
        let event = match fragments.next().await {
            Some(Ok(fragment)) => {
                let event = data_event(&fragment);
                return Some((Ok(event), Relay::Streaming(fragments)));
            }
            Some(Err(e)) => {
                warn!("[{}] stream aborted: {}", request_id, e);
                data_event(&format!("{} {}", ERROR_MARKER, e))
            }
            None => {
                debug!("[{}] stream complete", request_id);
                data_event(DONE_MARKER)
            }
        };
        Some((Ok::<_, Infallible>(event), Relay::Finished))
    })
}
