use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::Message;
use super::tool::{Tool, ToolChoice};

/// Unified chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages, in order
    pub messages: Vec<Message>,
    /// Logical model identifier: an alias or `provider:model`
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Tool definitions available to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool selection policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Extended thinking settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    /// Opaque per-call hints forwarded to providers that understand them
    /// (e.g. `web_search`, conversation-chaining ids)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn default_model() -> String {
    "local".to_owned()
}

impl ChatRequest {
    /// Whether extended thinking is requested
    pub fn thinking_enabled(&self) -> bool {
        self.thinking.as_ref().is_some_and(|t| t.enabled)
    }

    /// Thinking token budget, when thinking is enabled
    pub fn thinking_budget(&self) -> u32 {
        self.thinking.as_ref().map_or(DEFAULT_THINKING_BUDGET, |t| t.budget_tokens)
    }
}

const DEFAULT_THINKING_BUDGET: u32 = 10_000;

/// Extended thinking flag and budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    /// Whether thinking is enabled
    pub enabled: bool,
    /// Token budget for the reasoning pass
    #[serde(default = "default_budget")]
    pub budget_tokens: u32,
}

fn default_budget() -> u32 {
    DEFAULT_THINKING_BUDGET
}
