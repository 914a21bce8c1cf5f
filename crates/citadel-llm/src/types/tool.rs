use serde::{Deserialize, Serialize};

/// Universal tool definition with JSON-Schema-shaped parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Name, unique within a request
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Parameter schema
    pub parameters: serde_json::Value,
}

/// A tool call returned by the model, arguments already decoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id within the response
    pub id: String,
    /// Tool name
    pub name: String,
    /// Decoded arguments
    pub arguments: serde_json::Value,
}

/// How the model should select tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// One of the fixed policies
    Mode(ToolChoiceMode),
    /// Force a specific tool by name
    Named {
        /// Tool name the model must call
        name: String,
    },
}

/// Fixed tool-choice policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Model decides
    Auto,
    /// Tools disabled for this call
    None,
    /// Model must call some tool
    Any,
}
