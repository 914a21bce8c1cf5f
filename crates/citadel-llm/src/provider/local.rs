//! Local provider adapter: Ollama, vLLM, llama.cpp
//!
//! All three expose an OpenAI-compatible endpoint, so one adapter covers
//! them. No API key, and nothing leaves the machine.

use async_trait::async_trait;

use citadel_config::ProviderConfig;

use super::openai::OpenAiCompat;
use super::{DriftSender, EventStream, Provider};
use crate::error::AdapterError;
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, ModelCapabilities, Tool};

/// Local OpenAI-compatible server adapter
pub struct LocalAdapter {
    compat: OpenAiCompat,
    default_model: String,
}

impl LocalAdapter {
    pub fn new(name: String, config: &ProviderConfig, drift: Option<DriftSender>) -> Result<Self, AdapterError> {
        Ok(Self {
            default_model: config.default_model.clone(),
            compat: OpenAiCompat::new(name, config, drift)?,
        })
    }
}

#[async_trait]
impl Provider for LocalAdapter {
    fn name(&self) -> &str {
        &self.compat.name
    }

    fn list_models(&self) -> Vec<ModelCapabilities> {
        // Local models are whatever the user pulled; advertise the
        // configured default as the one known entry
        vec![ModelCapabilities {
            model_id: self.default_model.clone(),
            provider: self.compat.name.clone(),
            display_name: format!("Local: {}", self.default_model),
            supports_tools: true,
            supports_vision: false,
            supports_streaming: true,
            supports_thinking: false,
            context_window: 8_192,
            max_output_tokens: None,
            input_cost_per_million: Some(0.0),
            output_cost_per_million: Some(0.0),
            categories: vec!["local".to_owned(), "sovereign".to_owned()],
        }]
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError> {
        self.compat.chat_with_extra(request, None).await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream, AdapterError> {
        self.compat.chat_stream(request).await
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError> {
        self.compat.embed(request).await
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
