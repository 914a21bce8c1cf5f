//! OpenAI provider adapter
//!
//! The Chat Completions core here is shared with the xai and local
//! adapters through [`OpenAiCompat`]; the three differ in base URL,
//! authentication, catalog, and per-call extras.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use citadel_config::ProviderConfig;

use super::{DriftSender, EventStream, Provider, http_client, report_drift};
use crate::convert::openai as convert;
use crate::convert::openai::OpenAiStreamState;
use crate::error::{AdapterError, ErrorKind};
use crate::protocol::openai::{OpenAiEmbeddingRequest, OpenAiEmbeddingResponse, OpenAiResponse, OpenAiStreamChunk};
use crate::types::{
    ChatRequest, ChatResponse, Embedding, EmbeddingInput, EmbeddingRequest, EmbeddingResponse, Message,
    ModelCapabilities, Tool,
};

/// Shared Chat Completions implementation
pub(crate) struct OpenAiCompat {
    pub(crate) name: String,
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    drift: Option<DriftSender>,
}

impl OpenAiCompat {
    pub(crate) fn new(name: String, config: &ProviderConfig, drift: Option<DriftSender>) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.clone(),
            api_key: config.api_key(),
            drift,
            name,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    /// Execute chat, with optional extra top-level body fields merged in
    /// (used by xai for server-side search parameters)
    pub(crate) async fn chat_with_extra(
        &self,
        request: &ChatRequest,
        extra: Option<serde_json::Value>,
    ) -> Result<ChatResponse, AdapterError> {
        let wire = convert::request_to_wire(request, &request.model, false);
        let mut body = serde_json::to_value(&wire)
            .map_err(|e| AdapterError::new(ErrorKind::Unknown, &self.name, e.to_string()))?;
        if let (Some(object), Some(serde_json::Value::Object(extra_map))) = (body.as_object_mut(), extra) {
            object.extend(extra_map);
        }

        let response = self
            .authorized(self.client.post(self.url("chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            let status = http::StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(http::StatusCode::BAD_GATEWAY);
            let body_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(&self.name, status, &body_text));
        }

        let wire_response: OpenAiResponse = response.json().await.map_err(|e| {
            AdapterError::new(
                ErrorKind::SchemaMismatch,
                &self.name,
                format!("response did not match expected shape: {e}"),
            )
        })?;

        let mut drift_notes = Vec::new();
        let scri = convert::response_to_scri(&self.name, wire_response, &mut drift_notes)?;
        report_drift(self.drift.as_ref(), &self.name, &request.model, drift_notes);
        Ok(scri)
    }

    pub(crate) async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream, AdapterError> {
        let wire = convert::request_to_wire(request, &request.model, true);

        let response = self
            .authorized(self.client.post(self.url("chat/completions")))
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            let status = http::StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(http::StatusCode::BAD_GATEWAY);
            let body_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(&self.name, status, &body_text));
        }

        let provider = self.name.clone();
        let mut state = OpenAiStreamState::new();

        let mapped = response
            .bytes_stream()
            .eventsource()
            .flat_map(move |result| {
                let events: Vec<Result<crate::types::StreamEvent, AdapterError>> = match result {
                    Ok(event) => {
                        let data = event.data.trim().to_owned();
                        if data.is_empty() {
                            Vec::new()
                        } else if data == "[DONE]" {
                            state.end().into_iter().map(Ok).collect()
                        } else {
                            match serde_json::from_str::<OpenAiStreamChunk>(&data) {
                                Ok(chunk) => state.convert_chunk(chunk).into_iter().map(Ok).collect(),
                                Err(e) => vec![Err(AdapterError::new(
                                    ErrorKind::StreamFormatDrift,
                                    &provider,
                                    format!("unparseable stream chunk: {e}"),
                                ))],
                            }
                        }
                    }
                    Err(e) => vec![Err(AdapterError::new(ErrorKind::Transient, &provider, e.to_string()))],
                };
                futures_util::stream::iter(events)
            });

        Ok(Box::pin(mapped))
    }

    pub(crate) async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError> {
        let input = match &request.input {
            EmbeddingInput::Single(text) => serde_json::Value::String(text.clone()),
            EmbeddingInput::Batch(texts) => serde_json::to_value(texts)
                .map_err(|e| AdapterError::new(ErrorKind::Unknown, &self.name, e.to_string()))?,
        };
        let wire = OpenAiEmbeddingRequest {
            model: request.model.clone(),
            input,
            dimensions: request.dimensions,
        };

        let response = self
            .authorized(self.client.post(self.url("embeddings")))
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            let status = http::StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(http::StatusCode::BAD_GATEWAY);
            let body_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(&self.name, status, &body_text));
        }

        let wire_response: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            AdapterError::new(
                ErrorKind::SchemaMismatch,
                &self.name,
                format!("embedding response did not match expected shape: {e}"),
            )
        })?;

        if wire_response.data.is_empty() {
            return Err(AdapterError::new(
                ErrorKind::SchemaMismatch,
                &self.name,
                "embedding response contained no vectors",
            ));
        }

        Ok(EmbeddingResponse {
            embeddings: wire_response
                .data
                .into_iter()
                .map(|item| Embedding {
                    index: item.index,
                    embedding: item.embedding,
                })
                .collect(),
            model: wire_response.model,
            provider: self.name.clone(),
            usage: wire_response.usage.map(convert::usage_to_scri).unwrap_or_default(),
        })
    }

    /// Probe via the model listing endpoint
    pub(crate) async fn health_check(&self) -> Result<(), AdapterError> {
        let response = self
            .authorized(self.client.get(self.url("models")))
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = http::StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(http::StatusCode::BAD_GATEWAY);
            let body_text = response.text().await.unwrap_or_default();
            Err(AdapterError::from_status(&self.name, status, &body_text))
        }
    }

    pub(crate) fn convert_messages(&self, messages: &[Message]) -> Result<serde_json::Value, AdapterError> {
        serde_json::to_value(convert::messages_to_wire(messages))
            .map_err(|e| AdapterError::new(ErrorKind::Unknown, &self.name, e.to_string()))
    }

    pub(crate) fn convert_tools(&self, tools: &[Tool]) -> Result<serde_json::Value, AdapterError> {
        serde_json::to_value(convert::tools_to_wire(tools))
            .map_err(|e| AdapterError::new(ErrorKind::Unknown, &self.name, e.to_string()))
    }
}

/// OpenAI cloud adapter
pub struct OpenAiAdapter {
    compat: OpenAiCompat,
}

impl OpenAiAdapter {
    pub fn new(name: String, config: &ProviderConfig, drift: Option<DriftSender>) -> Result<Self, AdapterError> {
        Ok(Self {
            compat: OpenAiCompat::new(name, config, drift)?,
        })
    }
}

#[async_trait]
impl Provider for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.compat.name
    }

    fn list_models(&self) -> Vec<ModelCapabilities> {
        vec![
            catalog_entry("gpt-4.1", "GPT-4.1", 1_000_000, Some(2.0), Some(8.0), &["chat", "code"]),
            catalog_entry("gpt-4.1-mini", "GPT-4.1 Mini", 1_000_000, Some(0.4), Some(1.6), &["chat", "fast"]),
            catalog_entry("o3", "O3", 200_000, Some(2.0), Some(8.0), &["reasoning"]),
            catalog_entry(
                "text-embedding-3-large",
                "Text Embedding 3 Large",
                8_192,
                Some(0.13),
                None,
                &["embedding"],
            ),
        ]
        .into_iter()
        .map(|mut m| {
            m.provider = self.compat.name.clone();
            m
        })
        .collect()
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

pub(crate) fn catalog_entry(
    model_id: &str,
    display_name: &str,
    context_window: u32,
    input_cost: Option<f64>,
    output_cost: Option<f64>,
    categories: &[&str],
) -> ModelCapabilities {
    ModelCapabilities {
        model_id: model_id.to_owned(),
        provider: String::new(),
        display_name: display_name.to_owned(),
        supports_tools: true,
        supports_vision: true,
        supports_streaming: true,
        supports_thinking: false,
        context_window,
        max_output_tokens: Some(32_768),
        input_cost_per_million: input_cost,
        output_cost_per_million: output_cost,
        categories: categories.iter().map(|&c| c.to_owned()).collect(),
    }
}
