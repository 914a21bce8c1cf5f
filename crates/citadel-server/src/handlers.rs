//! SCRI request handlers: chat, streaming chat, embeddings, models, health

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use serde_json::json;

use citadel_core::HttpError;
use citadel_llm::types::{ChatRequest, EmbeddingRequest, StreamEvent};

use crate::state::Gateway;

/// Convert a domain error into the `{kind, message, provider?, details?}`
/// error body
pub(crate) fn error_response(error: &dyn HttpError) -> Response {
    let mut body = json!({
        "kind": error.error_kind(),
        "message": error.client_message(),
    });
    if let Some(provider) = error.provider() {
        body["provider"] = json!(provider);
    }
    if let Some(details) = error.details() {
        body["details"] = details;
    }
    let status = axum::http::StatusCode::from_u16(error.status_code().as_u16())
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

/// Handle `POST /api/v1/chat`
pub(crate) async fn chat(State(gateway): State<Gateway>, Json(request): Json<ChatRequest>) -> Response {
    match gateway.chat(request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => error_response(&error),
    }
}

/// Handle `POST /api/v1/chat/stream`
///
/// Server-sent events, one SCRI stream event per frame, terminated by a
/// `finish` event. A failure before the stream opens is a plain JSON
/// error; a failure mid-stream arrives as `finish` with `reason=error`.
pub(crate) async fn chat_stream(State(gateway): State<Gateway>, Json(request): Json<ChatRequest>) -> Response {
    match gateway.chat_stream(request).await {
        Ok((lineage, stream)) => {
            tracing::debug!(provider = %lineage.provider, fallback = lineage.fallback, "stream opened");
            sse_response(stream).into_response()
        }
        Err(error) => error_response(&error),
    }
}

fn sse_response(
    stream: impl Stream<Item = StreamEvent> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = stream.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_owned());
        Ok(Event::default().data(data))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Handle `POST /api/v1/embed`
pub(crate) async fn embed(State(gateway): State<Gateway>, Json(request): Json<EmbeddingRequest>) -> Response {
    match gateway.embed(request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => error_response(&error),
    }
}

/// Handle `GET /api/v1/models`
pub(crate) async fn models(State(gateway): State<Gateway>) -> Response {
    let models = gateway.models();
    let aliases: serde_json::Map<String, serde_json::Value> = gateway
        .inner
        .config
        .aliases
        .iter()
        .map(|(alias, target)| (alias.clone(), json!(target)))
        .collect();
    Json(json!({ "models": models, "aliases": aliases })).into_response()
}

/// Handle `GET /api/v1/health`: per-provider health and circuit state
pub(crate) async fn provider_health(State(gateway): State<Gateway>) -> Response {
    let mut providers = serde_json::Map::new();
    for name in gateway.inner.config.available_providers() {
        providers.insert(name.clone(), json!(gateway.inner.health.snapshot(&name)));
    }
    let circuits: Vec<serde_json::Value> = gateway
        .inner
        .config
        .available_providers()
        .iter()
        .map(|name| json!(gateway.inner.circuit.snapshot(name)))
        .collect();
    Json(json!({ "providers": providers, "circuits": circuits })).into_response()
}

/// Handle `GET /health`: liveness probe
pub(crate) async fn liveness() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}
