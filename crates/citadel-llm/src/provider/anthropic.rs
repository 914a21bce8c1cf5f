//! Anthropic Messages API provider adapter

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use citadel_config::ProviderConfig;

use super::{DriftSender, EventStream, Provider, http_client, report_drift};
use crate::convert::anthropic as convert;
use crate::convert::anthropic::AnthropicStreamState;
use crate::error::{AdapterError, ErrorKind};
use crate::protocol::anthropic::{AnthropicResponse, AnthropicStreamEvent};
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, ModelCapabilities, Role, Tool,
};

/// API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic adapter
pub struct AnthropicAdapter {
    name: String,
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    drift: Option<DriftSender>,
}

impl AnthropicAdapter {
    pub fn new(name: String, config: &ProviderConfig, drift: Option<DriftSender>) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.clone(),
            api_key: config.api_key(),
            drift,
            name,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.as_str().trim_end_matches('/'))
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key.expose_secret());
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
impl Provider for AnthropicAdapter {
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
                context_window: 200_000,
                max_output_tokens: Some(64_000),
                input_cost_per_million: Some(input),
                output_cost_per_million: Some(output),
                categories: categories.iter().map(|&c| c.to_owned()).collect(),
            }
        };
        vec![
            entry("claude-opus-4-5-20251101", "Claude Opus 4.5", 5.0, 25.0, &["chat", "reasoning", "code"]),
            entry("claude-sonnet-4-5-20250929", "Claude Sonnet 4.5", 3.0, 15.0, &["chat", "code"]),
            entry("claude-haiku-4-5-20251001", "Claude Haiku 4.5", 1.0, 5.0, &["chat", "fast"]),
        ]
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError> {
        let wire = convert::request_to_wire(request, &request.model, false);

        let response = self
            .request(self.messages_url())
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(self.fail_from_response(response).await);
        }

        let wire_response: AnthropicResponse = response.json().await.map_err(|e| {
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

    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream, AdapterError> {
        let wire = convert::request_to_wire(request, &request.model, true);

        let response = self
            .request(self.messages_url())
            .json(&wire)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(self.fail_from_response(response).await);
        }

        let provider = self.name.clone();
        let mut state = AnthropicStreamState::new();

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
                            match serde_json::from_str::<AnthropicStreamEvent>(&data) {
                                Ok(wire_event) => state.convert_event(wire_event).into_iter().map(Ok).collect(),
                                Err(e) => vec![Err(AdapterError::new(
                                    ErrorKind::StreamFormatDrift,
                                    &provider,
                                    format!("unparseable stream event: {e}"),
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

    fn supports_embed(&self) -> bool {
        false
    }

    /// Backstop for direct misuse; the router never routes embeds here
    async fn embed(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError> {
        Err(AdapterError::new(
            ErrorKind::Validation,
            &self.name,
            "anthropic does not serve embeddings; route the embed alias elsewhere",
        ))
    }

    /// Minimal paid probe: a one-token message against the cheapest model
    async fn health_check(&self) -> Result<(), AdapterError> {
        let probe = ChatRequest {
            messages: vec![Message::text(Role::User, "hi")],
            model: "claude-haiku-4-5-20251001".to_owned(),
            temperature: None,
            max_tokens: Some(1),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        };
        let wire = convert::request_to_wire(&probe, &probe.model, false);

        let response = self
            .request(self.messages_url())
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
