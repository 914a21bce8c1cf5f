use serde::{Deserialize, Serialize};

use super::message::{Content, ThinkingBlock};
use super::tool::ToolCall;

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation
    Stop,
    /// Model decided to call tools
    ToolCalls,
    /// Hit the output token limit
    Length,
    /// Provider refused on policy
    ContentFilter,
    /// Generation aborted by an error
    Error,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub input_tokens: u32,
    /// Tokens generated
    pub output_tokens: u32,
    /// Input + output
    pub total_tokens: u32,
    /// Prompt tokens served from cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    /// Prompt tokens written to cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u32>,
    /// Tokens spent on reasoning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Self::default()
        }
    }
}

/// Provenance of a response: which provider answered, how many attempts
/// it took, and which adapter version served it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lineage {
    /// Provider that produced the response
    pub provider: String,
    /// Concrete model that answered
    pub model: String,
    /// Live adapter version the request ran under
    pub adapter_version: u64,
    /// Unix milliseconds when routing started
    pub started_at_ms: u64,
    /// Unix milliseconds when the response completed
    pub completed_at_ms: u64,
    /// Candidates attempted, including the one that answered
    pub attempts: u32,
    /// Whether a fallback candidate answered
    pub fallback: bool,
}

/// Unified chat response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Response identifier
    pub id: String,
    /// Concrete model that answered
    pub model: String,
    /// Provider that answered
    pub provider: String,
    /// Response content
    pub content: Content,
    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Reasoning blocks, when thinking was enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Vec<ThinkingBlock>>,
    /// Why generation stopped
    pub finish_reason: FinishReason,
    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Provenance record
    #[serde(default)]
    pub lineage: Lineage,
}
