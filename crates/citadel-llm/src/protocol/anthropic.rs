//! Anthropic Messages API wire format

use serde::{Deserialize, Serialize};

// -- Request types --

/// Messages API request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    /// Model identifier
    pub model: String,
    /// Maximum tokens to generate (required by the API)
    pub max_tokens: u32,
    /// System prompt, top-level rather than in messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Conversation messages
    pub messages: Vec<AnthropicMessage>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Whether to stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    /// Tool choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
    /// Extended thinking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<AnthropicThinking>,
}

/// Extended thinking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicThinking {
    /// Always "enabled"
    #[serde(rename = "type")]
    pub thinking_type: String,
    /// Reasoning budget
    pub budget_tokens: u32,
}

/// Message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// "user" or "assistant"
    pub role: String,
    /// String shorthand or block array
    pub content: AnthropicContent,
}

/// String or block-array content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    /// Plain text
    Text(String),
    /// Content blocks
    Blocks(Vec<AnthropicContentBlock>),
}

/// Content block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    /// Text
    Text {
        /// The text
        text: String,
    },
    /// Image
    Image {
        /// Image source
        source: AnthropicImageSource,
    },
    /// Tool use by the assistant
    ToolUse {
        /// Tool use id
        id: String,
        /// Tool name
        name: String,
        /// Structured input
        input: serde_json::Value,
    },
    /// Tool result from the user turn
    ToolResult {
        /// Tool use this answers
        tool_use_id: String,
        /// Result content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        /// Whether the tool errored
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Extended thinking
    Thinking {
        /// Reasoning text
        thinking: String,
        /// Signature over the reasoning
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Image source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicImageSource {
    /// "base64" or "url"
    #[serde(rename = "type")]
    pub source_type: String,
    /// Media type for base64 sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Base64 data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// URL for url sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    /// Tool name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema input
    pub input_schema: serde_json::Value,
}

/// Tool choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicToolChoice {
    /// "auto", "none", "any", or "tool"
    #[serde(rename = "type")]
    pub choice_type: String,
    /// Specific tool name when type is "tool"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// -- Response types --

/// Messages API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    /// Response id
    #[serde(default)]
    pub id: String,
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// Content blocks
    #[serde(default)]
    pub content: Vec<AnthropicContentBlock>,
    /// Stop reason
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// Token usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    /// Input tokens
    #[serde(default)]
    pub input_tokens: u32,
    /// Output tokens
    #[serde(default)]
    pub output_tokens: u32,
    /// Cache reads
    #[serde(default)]
    pub cache_read_input_tokens: Option<u32>,
    /// Cache writes
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u32>,
}

// -- Stream event types --

/// SSE event in a streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    /// Stream opened
    MessageStart {
        /// Partial message with id/model/usage
        message: AnthropicStreamMessage,
    },
    /// A content block begins
    ContentBlockStart {
        /// Block position
        index: u32,
        /// The opening block
        content_block: AnthropicContentBlock,
    },
    /// Incremental block content
    ContentBlockDelta {
        /// Block position
        index: u32,
        /// The delta
        delta: AnthropicStreamDelta,
    },
    /// A content block ends
    ContentBlockStop {
        /// Block position
        index: u32,
    },
    /// Message-level delta (stop reason, usage)
    MessageDelta {
        /// The delta
        delta: AnthropicMessageDelta,
        /// Cumulative usage
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    /// Stream closed
    MessageStop,
    /// Keep-alive
    Ping,
}

/// Partial message in `message_start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicStreamMessage {
    /// Response id
    #[serde(default)]
    pub id: String,
    /// Model
    #[serde(default)]
    pub model: String,
    /// Usage so far
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// Block-level delta
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamDelta {
    /// Text fragment
    TextDelta {
        /// The fragment
        text: String,
    },
    /// Reasoning fragment
    ThinkingDelta {
        /// The fragment
        thinking: String,
    },
    /// Reasoning signature
    SignatureDelta {
        /// The signature
        signature: String,
    },
    /// Tool input JSON fragment
    InputJsonDelta {
        /// The fragment
        partial_json: String,
    },
}

/// Message-level delta payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicMessageDelta {
    /// Stop reason
    #[serde(default)]
    pub stop_reason: Option<String>,
}
