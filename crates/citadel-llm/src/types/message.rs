use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result
    Tool,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Message in a conversation
///
/// Block order within a message is semantically significant and is
/// preserved through every conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    pub role: Role,
    /// Message content
    pub content: Content,
    /// Optional participant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Plain-text message shorthand
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
            name: None,
        }
    }
}

/// Message content, either plain text or an ordered list of typed blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Ordered typed blocks
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Extract text content, joining text blocks in order
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Borrow the block list, treating plain text as a single block
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// A typed block within a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text {
        /// The text string
        text: String,
    },
    /// Image content
    Image {
        /// Image bytes or location
        source: ImageSource,
    },
    /// Tool invocation requested by the assistant
    ToolUse {
        /// Unique id for this tool use
        id: String,
        /// Tool name
        name: String,
        /// Structured arguments
        input: serde_json::Value,
    },
    /// Result of a tool invocation
    ToolResult {
        /// Tool use this result answers
        tool_use_id: String,
        /// Result payload
        content: serde_json::Value,
        /// Whether the tool errored
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Opaque reasoning content
    Thinking {
        /// Reasoning text
        thinking: String,
        /// Provider signature over the reasoning, when present
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Image bytes (base64 + media type) or a URI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Inline base64 data
    Base64 {
        /// Media type, e.g. `image/png`
        media_type: String,
        /// Base64-encoded bytes
        data: String,
    },
    /// Remote image
    Url {
        /// Image URI
        url: String,
    },
}

/// Extended reasoning block in a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    /// Reasoning text
    pub thinking: String,
    /// Provider signature over the reasoning, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}
