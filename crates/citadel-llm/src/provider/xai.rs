//! xAI (Grok) provider adapter
//!
//! Speaks the OpenAI-compatible wire format. What sets it apart is
//! server-side search: a request carrying the `web_search` metadata hint
//! gets live search enabled, which is what the heal worker's research
//! phase relies on.

use async_trait::async_trait;
use serde_json::json;

use citadel_config::ProviderConfig;

use super::openai::{OpenAiCompat, catalog_entry};
use super::{DriftSender, EventStream, Provider};
use crate::error::{AdapterError, ErrorKind};
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, ModelCapabilities, Tool};

/// xAI adapter
pub struct XaiAdapter {
    compat: OpenAiCompat,
}

impl XaiAdapter {
    pub fn new(name: String, config: &ProviderConfig, drift: Option<DriftSender>) -> Result<Self, AdapterError> {
        Ok(Self {
            compat: OpenAiCompat::new(name, config, drift)?,
        })
    }

    fn search_extra(request: &ChatRequest) -> Option<serde_json::Value> {
        request
            .metadata
            .get("web_search")
            .filter(|v| matches!(v.as_str(), "true" | "1" | "on"))
            .map(|_| json!({ "search_parameters": { "mode": "auto" } }))
    }
}

#[async_trait]
impl Provider for XaiAdapter {
    fn name(&self) -> &str {
        &self.compat.name
    }

    fn list_models(&self) -> Vec<ModelCapabilities> {
        vec![
            catalog_entry("grok-4", "Grok 4", 131_072, Some(3.0), Some(15.0), &["reasoning", "agentic"]),
            catalog_entry("grok-4-fast", "Grok 4 Fast", 131_072, Some(0.2), Some(0.5), &[
                "agentic", "fast", "research",
            ]),
        ]
        .into_iter()
        .map(|mut m| {
            m.provider = self.compat.name.clone();
            m.supports_thinking = true;
            m
        })
        .collect()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError> {
        self.compat.chat_with_extra(request, Self::search_extra(request)).await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream, AdapterError> {
        self.compat.chat_stream(request).await
    }

    fn supports_embed(&self) -> bool {
        false
    }

    /// Backstop for direct misuse; the router never routes embeds here
    async fn embed(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError> {
        Err(AdapterError::new(
            ErrorKind::Validation,
            self.name(),
            "xai does not serve embeddings; route the embed alias elsewhere",
        ))
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        self.compat.health_check().await
    }

    fn convert_messages(&self, messages: &[Message]) -> Result<serde_json::Value, AdapterError> {
        self.compat.convert_messages(messages)
    }

    fn convert_tools(&self, tools: &[Tool]) -> Result<serde_json::Value, AdapterError> {
        self.compat.convert_tools(tools)
    }
}
