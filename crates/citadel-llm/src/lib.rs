//! SCRI, the normalized request/response vocabulary, and the provider
//! adapters that translate it to and from each backend's wire format
//!
//! Application code speaks SCRI. Provider wire formats are treated as
//! unstable; adapters absorb their drift. Each adapter implements the same
//! contract: chat, streaming chat, embeddings, model listing, a health
//! probe, and the two pure conversion operations.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod convert;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod types;

pub use error::{AdapterError, ErrorKind, GatewayError, RouterError};
pub use provider::{AdapterBinding, DriftSignal, EventStream, Provider, ProviderRegistry, build_adapter};
pub use types::{
    ChatRequest, ChatResponse, ContentBlock, EmbeddingRequest, EmbeddingResponse, FinishReason, Lineage, Message,
    ModelCapabilities, Role, StreamEvent, Tool, ToolCall, Usage,
};
