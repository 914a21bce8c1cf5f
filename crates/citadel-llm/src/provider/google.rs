//! Google Generative Language provider adapter

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use citadel_config::ProviderConfig;

use super::{DriftSender, EventStream, Provider, http_client, report_drift};
use crate::convert::google as convert;
use crate::convert::google::GoogleStreamState;
use crate::error::{AdapterError, ErrorKind};
use crate::protocol::google::{GoogleEmbedResponse, GoogleResponse};
use crate::types::{
    ChatRequest, ChatResponse, Embedding, EmbeddingInput, EmbeddingRequest, EmbeddingResponse, Message,
    ModelCapabilities, Tool, Usage,
};

/// Google adapter
pub struct GoogleAdapter {
    name: String,
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    drift: Option<DriftSender>,
}

impl GoogleAdapter {
    pub fn new(name: String, config: &ProviderConfig, drift: Option<DriftSender>) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.clone(),
            api_key: config.api_key(),
            drift,
            name,
        })
    }

    fn model_url(&self, model: &str, action: &str) -> String {
        format!(
            "{}/models/{model}:{action}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key.expose_secret());
        }
        builder
    }

    async fn fail_from_response(&self, response: reqwest::Response) -> AdapterError {
        let status =
            http::StatusCode::from_u16(response.status().as_u16()).unwrap_or(http::StatusCode::BAD_GATEWAY);
        let body = response.text().await.unwrap_or_default();
        AdapterError::from_status(&self.name, status, &body)
    }
}

#[async_trait]
impl Provider for GoogleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_models(&self) -> Vec<ModelCapabilities> {
        let entry = |model_id: &str, display_name: &str, input: f64, output: f64, categories: &[&str]| {
            ModelCapabilities {
                model_id: model_id.to_owned(),
                provider: self.name.clone(),
                display_name: display_name.to_owned(),
                supports_tools: true,
                supports_vision: true,
                supports_streaming: true,
                supports_thinking: true,
                context_window: 1_000_000,
                max_output_tokens: Some(64_000),
                input_cost_per_million: Some(input),
                output_cost_per_million: Some(output),
                categories: categories.iter().map(|&c| c.to_owned()).collect(),
            }
        };
        vec![
            entry("gemini-2.5-pro", "Gemini 2.5 Pro", 1.25, 5.0, &["chat", "reasoning"]),
            entry("gemini-2.5-flash", "Gemini 2.5 Flash", 0.15, 0.6, &["chat", "fast"]),
            entry("gemini-2.5-flash-lite", "Gemini 2.5 Flash Lite", 0.05, 0.2, &["fast", "cheap"]),
        ]
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError> {
        let wire = convert::request_to_wire(request);

        let response = self
            .request(self.model_url(&request.model, "generateContent"))
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(self.fail_from_response(response).await);
        }

        let wire_response: GoogleResponse = response.json().await.map_err(|e| {
            AdapterError::new(
                ErrorKind::SchemaMismatch,
                &self.name,
                format!("response did not match expected shape: {e}"),
            )
        })?;

        let mut drift_notes = Vec::new();
        let scri = convert::response_to_scri(&self.name, &request.model, wire_response, &mut drift_notes)?;
        report_drift(self.drift.as_ref(), &self.name, &request.model, drift_notes);
        Ok(scri)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream, AdapterError> {
        let wire = convert::request_to_wire(request);

        let response = self
            .request(format!(
                "{}?alt=sse",
                self.model_url(&request.model, "streamGenerateContent")
            ))
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(self.fail_from_response(response).await);
        }

        let provider = self.name.clone();
        let mut state = GoogleStreamState::new();

        let mapped = response
            .bytes_stream()
            .eventsource()
            .flat_map(move |result| {
                let events: Vec<Result<crate::types::StreamEvent, AdapterError>> = match result {
                    Ok(event) => {
                        let data = event.data.trim().to_owned();
                        if data.is_empty() {
                            Vec::new()
                        } else {
                            match serde_json::from_str::<GoogleResponse>(&data) {
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

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError> {
        let texts: Vec<String> = match &request.input {
            EmbeddingInput::Single(text) => vec![text.clone()],
            EmbeddingInput::Batch(items) => items.clone(),
        };

        let mut embeddings = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let wire = convert::embed_to_wire(text, request.dimensions);
            let response = self
                .request(self.model_url(&request.model, "embedContent"))
                .json(&wire)
                .send()
                .await
                .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

            if !response.status().is_success() {
                return Err(self.fail_from_response(response).await);
            }

            let wire_response: GoogleEmbedResponse = response.json().await.map_err(|e| {
                AdapterError::new(
                    ErrorKind::SchemaMismatch,
                    &self.name,
                    format!("embedding response did not match expected shape: {e}"),
                )
            })?;

            embeddings.push(Embedding {
                index,
                embedding: wire_response.embedding.values,
            });
        }

        Ok(EmbeddingResponse {
            embeddings,
            model: request.model.clone(),
            provider: self.name.clone(),
            usage: Usage::default(),
        })
    }

    /// Probe with a minimal one-token generation
    async fn health_check(&self) -> Result<(), AdapterError> {
        let probe = ChatRequest {
            messages: vec![Message::text(crate::types::Role::User, "hi")],
            model: "gemini-2.5-flash-lite".to_owned(),
            temperature: None,
            max_tokens: Some(1),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        };
        let wire = convert::request_to_wire(&probe);

        let response = self
            .request(self.model_url(&probe.model, "generateContent"))
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.fail_from_response(response).await)
        }
    }

    fn convert_messages(&self, messages: &[Message]) -> Result<serde_json::Value, AdapterError> {
        serde_json::to_value(convert::messages_to_wire(messages))
            .map_err(|e| AdapterError::new(ErrorKind::Unknown, &self.name, e.to_string()))
    }

    fn convert_tools(&self, tools: &[Tool]) -> Result<serde_json::Value, AdapterError> {
        serde_json::to_value(convert::tools_to_wire(tools))
            .map_err(|e| AdapterError::new(ErrorKind::Unknown, &self.name, e.to_string()))
    }
}
