use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use axum::body::{ to_bytes, Body, Bytes };
use axum::extract::State;
use axum::http::{ header, Request, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::{ Json, Router };
use futures::{ stream, StreamExt };
use serde_json::{ json, Value };
use tower::ServiceExt;

use testcase_relay::config::prompt::build_messages;
use testcase_relay::llm::chat::ollama::OllamaClient;
use testcase_relay::llm::chat::ChatClient;
use testcase_relay::llm::LlmError;
use testcase_relay::server::api::{ router, AppState };

type Recorded = Arc<Mutex<Vec<Value>>>;

/// NDJSON body whose lines are split across network chunks on purpose.
const SPLIT_STREAM: [&str; 3] = [
    "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n{\"mess",
    "age\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"eval_count\":2}\n",
];

const FLAKY_STREAM: [&str; 2] = [
    "{\"message\":{\"role\":\"assistant\",\"content\":\"TC_001\"},\"done\":false}\n",
    "{\"error\":\"model runner has unexpectedly stopped\"}\n",
];

async fn tags() -> Json<Value> {
    Json(
        json!({
            "models": [
                { "name": "llama3.2:latest", "model": "llama3.2:latest", "size": 2019393189 },
                { "name": "nomic-embed-text:latest", "model": "nomic-embed-text:latest", "size": 274302450 }
            ]
        })
    )
}

fn ndjson(chunks: &'static [&'static str]) -> Response {
    let parts = stream::iter(chunks.iter().map(|c| Ok::<_, Infallible>(Bytes::from_static(c.as_bytes()))));
    ([(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(parts)).into_response()
}

async fn chat(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Response {
    recorded.lock().unwrap().push(body.clone());
    let model = body["model"].as_str().unwrap_or_default();
    let streaming = body["stream"].as_bool().unwrap_or(true);

    match (model, streaming) {
        ("missing", _) =>
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "model \"missing\" not found, try pulling it first" })),
            ).into_response(),
        ("flaky", true) => ndjson(&FLAKY_STREAM),
        (_, true) => ndjson(&SPLIT_STREAM),
        (_, false) =>
            Json(
                json!({
                    "model": model,
                    "message": { "role": "assistant", "content": "**Test Case ID:** TC_001" },
                    "done": true
                })
            ).into_response(),
    }
}

async fn fake_ollama() -> (String, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/chat", post(chat))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), recorded)
}

async fn closed_port() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Sets its flag when the fake server drops the response body.
struct BodyGuard(Arc<AtomicBool>);

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Ollama stand-in whose chat stream sends one fragment and then never ends.
async fn endless_ollama(dropped: Arc<AtomicBool>) -> String {
    let app = Router::new().route(
        "/api/chat",
        post(move || {
            let guard = BodyGuard(dropped.clone());
            async move {
                let first = "{\"message\":{\"role\":\"assistant\",\"content\":\"x\"},\"done\":false}\n";
                let parts = stream
                    ::once(async move { Ok::<_, Infallible>(Bytes::from_static(first.as_bytes())) })
                    .chain(stream::pending())
                    .map(move |part| {
                        let _held = &guard;
                        part
                    });
                ([(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(parts))
            }
        })
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, model: &str) -> OllamaClient {
    OllamaClient::new(Some(base_url.to_string()), Some(model.to_string()))
}

async fn collect(client: &OllamaClient) -> Vec<Result<String, LlmError>> {
    let stream = client.generate_stream(&build_messages("login form")).await.unwrap();
    stream.collect().await
}

#[tokio::test]
async fn generate_sends_chat_request_and_returns_content() {
    let (url, recorded) = fake_ollama().await;
    let text = client(&url, "llama3.2").generate(&build_messages("login form")).await.unwrap();
    assert_eq!(text, "**Test Case ID:** TC_001");

    let requests = recorded.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["model"], json!("llama3.2"));
    assert_eq!(requests[0]["stream"], json!(false));
    assert_eq!(requests[0]["messages"][0]["role"], json!("system"));
    assert_eq!(requests[0]["messages"][1], json!({ "role": "user", "content": "login form" }));
}

#[tokio::test]
async fn unknown_model_is_model_error() {
    let (url, _) = fake_ollama().await;
    let err = client(&url, "missing").generate(&build_messages("x")).await.unwrap_err();
    assert_eq!(
        err,
        LlmError::Model("model \"missing\" not found, try pulling it first (status code: 404)".into())
    );

    let err = client(&url, "missing").generate_stream(&build_messages("x")).await.err().unwrap();
    assert!(matches!(err, LlmError::Model(_)));
}

#[tokio::test]
async fn unreachable_server_is_connection_error() {
    let url = closed_port().await;
    let err = client(&url, "llama3.2").generate(&build_messages("x")).await.unwrap_err();
    assert!(matches!(err, LlmError::Connection(_)));
    assert!(err.to_string().starts_with("Failed to connect to Ollama: "));
}

#[tokio::test]
async fn stream_reassembles_split_lines() {
    let (url, recorded) = fake_ollama().await;
    let fragments: Vec<String> = collect(&client(&url, "llama3.2")).await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(fragments, vec!["Hel", "lo"]);
    assert_eq!(recorded.lock().unwrap()[0]["stream"], json!(true));
}

#[tokio::test]
async fn stream_error_line_aborts_with_model_error() {
    let (url, _) = fake_ollama().await;
    let items = collect(&client(&url, "flaky")).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok("TC_001".to_string()));
    assert_eq!(items[1], Err(LlmError::Model("model runner has unexpectedly stopped".into())));
}

#[tokio::test]
async fn health_matches_tagged_model() {
    let (url, _) = fake_ollama().await;
    let status = client(&url, "llama3.2").check_health().await;
    assert!(status.healthy);
    assert_eq!(status.models, vec!["llama3.2:latest", "nomic-embed-text:latest"]);

    let status = client(&url, "mistral").check_health().await;
    assert!(!status.healthy);
    assert_eq!(status.message, "Model 'mistral' not found");
}

#[tokio::test]
async fn health_never_fails_when_unreachable() {
    let url = closed_port().await;
    let status = client(&url, "llama3.2").check_health().await;
    assert!(!status.healthy);
    assert!(status.message.starts_with("Ollama connection failed: "));
    assert!(status.models.is_empty());
}

#[tokio::test]
async fn relays_ollama_stream_as_sse() {
    let (url, _) = fake_ollama().await;
    let app = router(AppState::new(Arc::new(client(&url, "llama3.2"))), None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/generate/stream")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"user_input":"password reset"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(
        String::from_utf8(body.to_vec()).unwrap(),
        "data: Hel\n\ndata: lo\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn dropping_stream_abandons_upstream_body() {
    let dropped = Arc::new(AtomicBool::new(false));
    let url = endless_ollama(dropped.clone()).await;

    let mut stream = client(&url, "llama3.2")
        .generate_stream(&build_messages("login form")).await
        .unwrap();
    assert_eq!(stream.next().await, Some(Ok("x".to_string())));
    assert!(!dropped.load(Ordering::SeqCst));

    drop(stream);
    for _ in 0..40 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped.load(Ordering::SeqCst), "upstream body still held after the stream was dropped");
}
