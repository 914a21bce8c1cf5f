use serde::{Deserialize, Serialize};

use super::response::{FinishReason, Usage};

/// Event in a streaming chat response
///
/// Adapters emit exactly one `finish` event, last. Consumers treat a
/// stream that ends without one as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text content
    TextDelta {
        /// Text fragment
        text: String,
    },
    /// Incremental reasoning content
    ThinkingDelta {
        /// Reasoning fragment
        thinking: String,
    },
    /// A tool call has started
    ToolCallStart {
        /// Position of this call within the response
        index: u32,
        /// Tool call id
        id: String,
        /// Tool name
        name: String,
    },
    /// Incremental tool-call argument JSON
    ToolCallArgDelta {
        /// Position of the call the fragment belongs to
        index: u32,
        /// Raw JSON fragment
        arguments: String,
    },
    /// A tool call is complete
    ToolCallEnd {
        /// Position of the completed call
        index: u32,
    },
    /// Usage statistics update
    UsageUpdate {
        /// Usage so far (or final)
        usage: Usage,
    },
    /// Terminal event
    Finish {
        /// Why the stream ended
        reason: FinishReason,
        /// Error payload when `reason` is `error`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<StreamError>,
    },
}

impl StreamEvent {
    /// Terminal event for a clean stop
    pub const fn finish(reason: FinishReason) -> Self {
        Self::Finish { reason, error: None }
    }

    /// Terminal event for a mid-stream failure
    pub fn finish_error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Finish {
            reason: FinishReason::Error,
            error: Some(StreamError {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }

    pub const fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

/// Error payload carried by a terminal `finish` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    /// Classified error kind
    pub kind: String,
    /// Truncated message
    pub message: String,
}
