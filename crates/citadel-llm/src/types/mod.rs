//! Canonical SCRI types
//!
//! Provider-agnostic structures for messages, tools, responses, usage and
//! streaming. All wire formats convert to and from these; provider-specific
//! structures never leak past the adapter boundary.

pub mod capabilities;
pub mod embedding;
pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use capabilities::ModelCapabilities;
pub use embedding::{Embedding, EmbeddingInput, EmbeddingRequest, EmbeddingResponse};
pub use message::{Content, ContentBlock, ImageSource, Message, Role, ThinkingBlock};
pub use request::{ChatRequest, ThinkingConfig};
pub use response::{ChatResponse, FinishReason, Lineage, Usage};
pub use stream::{StreamError, StreamEvent};
pub use tool::{Tool, ToolCall, ToolChoice, ToolChoiceMode};
