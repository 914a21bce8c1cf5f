use serde::{Deserialize, Serialize};

use super::response::Usage;

/// Unified embedding request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text(s) to embed
    pub input: EmbeddingInput,
    /// Logical model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// Requested output dimensionality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

fn default_model() -> String {
    "embed".to_owned()
}

/// One string or a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    /// Single input
    Single(String),
    /// Batch of inputs, embedded in order
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(s) => s.is_empty(),
            Self::Batch(items) => items.is_empty(),
        }
    }
}

/// One embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    /// Position in the input batch
    pub index: usize,
    /// The vector
    pub embedding: Vec<f32>,
}

/// Unified embedding response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Vectors, in input order
    pub embeddings: Vec<Embedding>,
    /// Concrete model that answered
    pub model: String,
    /// Provider that answered
    pub provider: String,
    /// Token usage
    pub usage: Usage,
}
