//! Provider adapter contract and registry

pub mod anthropic;
pub mod google;
pub mod local;
pub mod openai;
pub mod xai;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use citadel_config::{Config, ProviderConfig, ProviderKind};
use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::{AdapterError, ErrorKind};
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ModelCapabilities, StreamEvent};

/// Boxed SCRI event stream returned by streaming chat
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AdapterError>> + Send>>;

/// A soft wire-format drift observation
///
/// Emitted when an adapter produced a valid SCRI value but could not
/// cleanly map a provider field. The health monitor treats these as
/// structural signals without failing any request.
#[derive(Debug, Clone)]
pub struct DriftSignal {
    /// Provider the drift was observed on
    pub provider: String,
    /// Model in use at the time
    pub model: String,
    /// Structural kind the gap corresponds to
    pub kind: ErrorKind,
    /// What could not be mapped
    pub message: String,
}

/// Channel adapters use to report soft drift
pub type DriftSender = mpsc::UnboundedSender<DriftSignal>;

/// Contract every provider adapter implements
///
/// `convert_messages` and `convert_tools` are pure: they perform the
/// SCRI -> native translation without touching the network, so drift in
/// the request direction is testable in isolation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name as registered
    fn name(&self) -> &str;

    /// Static model catalog
    fn list_models(&self) -> Vec<ModelCapabilities>;

    /// Execute a chat request
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError>;

    /// Execute a streaming chat request
    ///
    /// The returned stream emits exactly one `finish` event, last.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream, AdapterError>;

    /// Whether this adapter serves the embed operation
    ///
    /// The router consults this when building embed candidate lists, so
    /// a family without embeddings is never walked into mid-request.
    fn supports_embed(&self) -> bool {
        true
    }

    /// Execute an embedding request
    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError>;

    /// Probe the provider
    async fn health_check(&self) -> Result<(), AdapterError>;

    /// Pure SCRI -> native message translation
    fn convert_messages(&self, messages: &[crate::types::Message]) -> Result<serde_json::Value, AdapterError>;

    /// Pure SCRI -> native tool translation
    fn convert_tools(&self, tools: &[crate::types::Tool]) -> Result<serde_json::Value, AdapterError>;
}

/// The live adapter for a provider, tagged with its reload version
///
/// Bindings are immutable; a reload installs a fresh binding. A request
/// that cloned the `Arc` keeps its binding for its whole lifetime, so a
/// swap mid-request is invisible to it.
pub struct AdapterBinding {
    /// Version as tracked by the reload manager
    pub version: u64,
    /// The adapter itself
    pub adapter: Arc<dyn Provider>,
}

/// Registry of live adapter bindings, keyed by provider name
///
/// The swap point for reloads: replacing an entry is a single atomic
/// operation, and readers only ever observe a complete binding.
#[derive(Default)]
pub struct ProviderRegistry {
    bindings: DashMap<String, Arc<AdapterBinding>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the live binding for a provider
    pub fn bind(&self, provider: impl Into<String>, version: u64, adapter: Arc<dyn Provider>) {
        self.bindings
            .insert(provider.into(), Arc::new(AdapterBinding { version, adapter }));
    }

    /// Current live binding for a provider
    pub fn get(&self, provider: &str) -> Option<Arc<AdapterBinding>> {
        self.bindings.get(provider).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered provider names
    pub fn names(&self) -> Vec<String> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Live version for a provider, 0 when unregistered
    pub fn live_version(&self, provider: &str) -> u64 {
        self.get(provider).map_or(0, |binding| binding.version)
    }
}

/// Construct an adapter for a configured provider
///
/// The single construction point: initial registration and every reload
/// rebind go through here.
pub fn build_adapter(
    name: &str,
    config: &ProviderConfig,
    drift: Option<DriftSender>,
) -> Result<Arc<dyn Provider>, AdapterError> {
    let adapter: Arc<dyn Provider> = match config.kind {
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(name.to_owned(), config, drift)?),
        ProviderKind::Openai => Arc::new(openai::OpenAiAdapter::new(name.to_owned(), config, drift)?),
        ProviderKind::Google => Arc::new(google::GoogleAdapter::new(name.to_owned(), config, drift)?),
        ProviderKind::Xai => Arc::new(xai::XaiAdapter::new(name.to_owned(), config, drift)?),
        ProviderKind::Local => Arc::new(local::LocalAdapter::new(name.to_owned(), config, drift)?),
    };
    Ok(adapter)
}

/// The mapping-contract text for a provider family
///
/// Versioned as the adapter's source blob and included in heal prompts.
pub fn mapping_spec(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => crate::convert::anthropic::MAPPING_SPEC,
        ProviderKind::Google => crate::convert::google::MAPPING_SPEC,
        ProviderKind::Openai | ProviderKind::Xai | ProviderKind::Local => crate::convert::openai::MAPPING_SPEC,
    }
}

/// Build a registry with version-1 bindings for every available provider
pub fn registry_from_config(config: &Config, drift: Option<&DriftSender>) -> Result<ProviderRegistry, AdapterError> {
    let registry = ProviderRegistry::new();
    for name in config.available_providers() {
        let provider_config = &config.providers[name.as_str()];
        let adapter = build_adapter(&name, provider_config, drift.cloned())?;
        registry.bind(name, 1, adapter);
    }
    Ok(registry)
}

/// Shared reqwest client construction for adapters
pub(crate) fn http_client(timeout_secs: f64) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs_f64(timeout_secs))
        .build()
        .map_err(|e| AdapterError::new(ErrorKind::Unknown, "gateway", format!("http client init failed: {e}")))
}

/// Report a batch of conversion drift notes on the adapter's channel
pub(crate) fn report_drift(
    drift: Option<&DriftSender>,
    provider: &str,
    model: &str,
    notes: Vec<crate::convert::DriftNote>,
) {
    let Some(sender) = drift else { return };
    for note in notes {
        tracing::warn!(provider, model, kind = note.kind.as_str(), message = %note.message, "wire drift observed");
        let _ = sender.send(DriftSignal {
            provider: provider.to_owned(),
            model: model.to_owned(),
            kind: note.kind,
            message: note.message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citadel_config::default_providers;

    #[test]
    fn embed_capability_follows_family() {
        let providers = default_providers();
        for (name, serves_embeddings) in [
            ("ollama", true),
            ("openai", true),
            ("google", true),
            ("anthropic", false),
            ("xai", false),
        ] {
            let adapter = build_adapter(name, &providers[name], None).unwrap();
            assert_eq!(adapter.supports_embed(), serves_embeddings, "{name}");
        }
    }
}
