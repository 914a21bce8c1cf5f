use serde::{Deserialize, Serialize};

/// Model capability metadata advertised by an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Model identifier as the provider knows it
    pub model_id: String,
    /// Owning provider
    pub provider: String,
    /// Human-readable name
    pub display_name: String,
    /// Tool calling support
    pub supports_tools: bool,
    /// Vision input support
    pub supports_vision: bool,
    /// Streaming support
    pub supports_streaming: bool,
    /// Extended thinking support
    pub supports_thinking: bool,
    /// Context window in tokens
    pub context_window: u32,
    /// Output token ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// USD per million input tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost_per_million: Option<f64>,
    /// USD per million output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost_per_million: Option<f64>,
    /// Freeform category tags
    #[serde(default)]
    pub categories: Vec<String>,
}
