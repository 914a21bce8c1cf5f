//! Scriptable mock provider speaking the OpenAI-compatible wire format
//!
//! Each chat request pops the next script entry; an empty queue serves
//! the default. This is what lets a test stage "fail three times, then
//! recover" or feed the heal worker canned diagnose/research/fix turns.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// What the mock answers a chat request with
#[derive(Debug, Clone)]
pub enum Script {
    /// 200 with this text content
    Text(String),
    /// HTTP error with this status and body
    Status(u16, String),
    /// 200 with an empty JSON object; the adapter sees a schema mismatch
    Empty,
}

pub struct MockProvider {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    scripts: Mutex<VecDeque<Script>>,
    default: Script,
    chat_count: AtomicU32,
    embed_count: AtomicU32,
}

impl MockProvider {
    /// Start with the stock greeting as the default response
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(Script::Text("Hello from mock provider".to_owned()), Vec::new()).await
    }

    /// Start with scripted responses consumed in order, then the default
    pub async fn start_scripted(scripts: Vec<Script>) -> anyhow::Result<Self> {
        Self::start_with(Script::Text("Hello from mock provider".to_owned()), scripts).await
    }

    /// Start with a custom default response
    pub async fn start_with(default: Script, scripts: Vec<Script>) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            scripts: Mutex::new(scripts.into()),
            default,
            chat_count: AtomicU32::new(0),
            embed_count: AtomicU32::new(0),
        });

        let app = Router::new()
            .route("/chat/completions", routing::post(handle_chat))
            .route("/models", routing::get(handle_models))
            .route("/embeddings", routing::post(handle_embeddings))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL to configure as the provider's `base_url`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn chat_count(&self) -> u32 {
        self.state.chat_count.load(Ordering::Relaxed)
    }

    pub fn embed_count(&self) -> u32 {
        self.state.embed_count.load(Ordering::Relaxed)
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    #[serde(default)]
    stream: Option<bool>,
}

async fn handle_chat(
    State(state): State<Arc<MockState>>,
    Json(request): Json<serde_json::Value>,
) -> axum::response::Response {
    state.chat_count.fetch_add(1, Ordering::Relaxed);

    let request: ChatRequest = match serde_json::from_value(request) {
        Ok(request) => request,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": {"message": "bad request"}}))).into_response();
        }
    };

    let script = state
        .scripts
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| state.default.clone());

    match script {
        Script::Status(status, body) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(json!({"error": {"message": body}})),
        )
            .into_response(),
        Script::Empty => Json(json!({})).into_response(),
        Script::Text(content) => {
            if request.stream.unwrap_or(false) {
                streaming_response(&request.model, &content)
            } else {
                Json(json!({
                    "id": "chatcmpl-mock-1",
                    "object": "chat.completion",
                    "created": 1_700_000_000,
                    "model": request.model,
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": content},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                }))
                .into_response()
            }
        }
    }
}

/// SSE body: role chunk, word chunks, finish chunk, usage chunk, [DONE]
fn streaming_response(model: &str, content: &str) -> axum::response::Response {
    let mut body = String::new();

    let chunk = |delta: serde_json::Value, finish: Option<&str>| {
        json!({
            "id": "chatcmpl-mock-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
        })
    };

    body.push_str(&format!("data: {}\n\n", chunk(json!({"role": "assistant"}), None)));
    for word in content.split_whitespace() {
        body.push_str(&format!("data: {}\n\n", chunk(json!({"content": format!("{word} ")}), None)));
    }
    body.push_str(&format!("data: {}\n\n", chunk(json!({}), Some("stop"))));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({
            "id": "chatcmpl-mock-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    ));
    body.push_str("data: [DONE]\n\n");

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response()
}

async fn handle_models(State(_state): State<Arc<MockState>>) -> impl IntoResponse {
    Json(json!({
        "object": "list",
        "data": [{"id": "mock-model", "object": "model"}]
    }))
}

async fn handle_embeddings(
    State(state): State<Arc<MockState>>,
    Json(request): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.embed_count.fetch_add(1, Ordering::Relaxed);
    Json(json!({
        "object": "list",
        "data": [{"object": "embedding", "embedding": [0.1, 0.2, 0.3, 0.4], "index": 0}],
        "model": request["model"],
        "usage": {"prompt_tokens": 6, "completion_tokens": 0, "total_tokens": 6}
    }))
}
