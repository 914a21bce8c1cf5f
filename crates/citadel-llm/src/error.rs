//! Error taxonomy for adapter and routing failures
//!
//! Every adapter error carries a `kind` from a closed taxonomy. Structural
//! kinds indicate the adapter's view of the provider wire format has
//! drifted; they feed the health monitor's heal gating. Transient kinds
//! drive fallback but never trip the circuit breaker.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use citadel_core::HttpError;

/// Closed classification of adapter errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 429, 503, connection reset, timeout; resolves on its own
    Transient,
    /// 401/403, invalid key
    Auth,
    /// Caller-fault 400
    Validation,
    /// Provider refused on policy
    ContentFilter,
    /// Required field absent or JSON shape wrong
    SchemaMismatch,
    /// Unrecognized field at a load-bearing position
    UnknownField,
    /// Documented-removed field the adapter still expects
    DeprecatedField,
    /// Provider tool format changed
    ToolSchemaDrift,
    /// Stream event type or envelope changed
    StreamFormatDrift,
    /// Unrecognized; logged verbatim for later reclassification
    Unknown,
}

impl ErrorKind {
    /// Whether this kind signals wire-format drift (feeds heal gating and
    /// circuit failure counting)
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch | Self::UnknownField | Self::DeprecatedField | Self::ToolSchemaDrift | Self::StreamFormatDrift
        )
    }

    /// Whether the router may advance to a fallback candidate.
    /// Validation and policy refusals are caller-fault: rerouting them
    /// would return a different answer to the same mistake.
    pub const fn allows_fallback(self) -> bool {
        !matches!(self, Self::Validation | Self::ContentFilter)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::ContentFilter => "content_filter",
            Self::SchemaMismatch => "schema_mismatch",
            Self::UnknownField => "unknown_field",
            Self::DeprecatedField => "deprecated_field",
            Self::ToolSchemaDrift => "tool_schema_drift",
            Self::StreamFormatDrift => "stream_format_drift",
            Self::Unknown => "unknown",
        }
    }
}

/// An error attributed to a provider adapter
#[derive(Debug, Clone, Error)]
#[error("[{provider}] {}: {message}", kind.as_str())]
pub struct AdapterError {
    /// Classified kind
    pub kind: ErrorKind,
    /// Provider the error is attributed to
    pub provider: String,
    /// Raw message, truncated for transport
    pub message: String,
    /// Upstream HTTP status when there was one
    pub status: Option<u16>,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            message: truncate(message.into()),
            status: None,
        }
    }

    /// Classify an upstream HTTP error response
    pub fn from_status(provider: impl Into<String>, status: StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => ErrorKind::Auth,
            400 | 404 | 422 => classify_client_fault(body),
            429 | 500 | 502 | 503 | 504 => ErrorKind::Transient,
            _ => ErrorKind::Unknown,
        };
        Self {
            kind,
            provider: provider.into(),
            message: truncate(format!("provider returned {status}: {body}")),
            status: Some(status.as_u16()),
        }
    }

    /// Classify a transport-level failure from the HTTP client
    pub fn from_transport(provider: impl Into<String>, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() || error.is_connect() || error.is_request() {
            ErrorKind::Transient
        } else if error.is_decode() {
            ErrorKind::SchemaMismatch
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, provider, error.to_string())
    }

    /// Stable signature for dedup: provider + kind + digit-normalized
    /// message digest
    pub fn signature(&self) -> String {
        signature_of(&self.provider, self.kind, &self.message)
    }
}

/// Stable signature for an error occurrence
pub fn signature_of(provider: &str, kind: ErrorKind, message: &str) -> String {
    let normalized: String = message
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_digit() { 'N' } else { c })
        .collect();
    let digest = Sha256::digest(format!("{provider}:{}:{normalized}", kind.as_str()));
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Distinguish content-policy refusals from plain validation errors in a
/// 4xx body
fn classify_client_fault(body: &str) -> ErrorKind {
    let lower = body.to_ascii_lowercase();
    if lower.contains("content policy") || lower.contains("content_filter") || lower.contains("safety") {
        ErrorKind::ContentFilter
    } else {
        ErrorKind::Validation
    }
}

const MAX_MESSAGE_LEN: usize = 500;

fn truncate(mut message: String) -> String {
    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("...");
    }
    message
}

impl HttpError for AdapterError {
    fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Transient => StatusCode::BAD_GATEWAY,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::ContentFilter => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_kind(&self) -> &str {
        self.kind.as_str()
    }

    fn client_message(&self) -> String {
        self.message.clone()
    }

    fn provider(&self) -> Option<&str> {
        Some(&self.provider)
    }
}

/// One failed candidate in a routing walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptError {
    /// Candidate provider
    pub provider: String,
    /// Classified kind
    pub kind: ErrorKind,
    /// Truncated message
    pub message: String,
}

/// Errors raised by the router itself
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// Every candidate failed; attempts enumerate what happened
    #[error("all providers failed for model '{model}' after {} attempt(s)", attempts.len())]
    AllProvidersFailed {
        model: String,
        attempts: Vec<AttemptError>,
    },

    /// Resolution produced no usable candidate
    #[error("no candidate provider for model '{model}'")]
    NoCandidate { model: String },

    /// The resolved provider is disabled
    #[error("provider '{provider}' is disabled")]
    Disabled { provider: String },
}

impl HttpError for RouterError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AllProvidersFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::NoCandidate { .. } => StatusCode::NOT_FOUND,
            Self::Disabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_kind(&self) -> &str {
        match self {
            Self::AllProvidersFailed { .. } => "all_providers_failed",
            Self::NoCandidate { .. } => "no_candidate",
            Self::Disabled { .. } => "disabled",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::AllProvidersFailed { attempts, .. } => serde_json::to_value(attempts).ok(),
            _ => None,
        }
    }
}

/// Error surface of a routed request: either the router gave up or a
/// terminal adapter error was passed through
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl HttpError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Router(e) => e.status_code(),
            Self::Adapter(e) => e.status_code(),
        }
    }

    fn error_kind(&self) -> &str {
        match self {
            Self::Router(e) => e.error_kind(),
            Self::Adapter(e) => e.error_kind(),
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Router(e) => e.client_message(),
            Self::Adapter(e) => e.client_message(),
        }
    }

    fn provider(&self) -> Option<&str> {
        match self {
            Self::Router(e) => e.provider(),
            Self::Adapter(e) => e.provider(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Router(e) => e.details(),
            Self::Adapter(e) => e.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_kinds() {
        assert!(ErrorKind::SchemaMismatch.is_structural());
        assert!(ErrorKind::StreamFormatDrift.is_structural());
        assert!(!ErrorKind::Transient.is_structural());
        assert!(!ErrorKind::Auth.is_structural());
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            AdapterError::from_status("p", StatusCode::TOO_MANY_REQUESTS, "slow down").kind,
            ErrorKind::Transient
        );
        assert_eq!(
            AdapterError::from_status("p", StatusCode::UNAUTHORIZED, "bad key").kind,
            ErrorKind::Auth
        );
        assert_eq!(
            AdapterError::from_status("p", StatusCode::BAD_REQUEST, "missing field").kind,
            ErrorKind::Validation
        );
        assert_eq!(
            AdapterError::from_status("p", StatusCode::BAD_REQUEST, "violates content policy").kind,
            ErrorKind::ContentFilter
        );
    }

    #[test]
    fn signature_normalizes_digits() {
        let a = AdapterError::new(ErrorKind::SchemaMismatch, "openai", "missing field at index 3");
        let b = AdapterError::new(ErrorKind::SchemaMismatch, "openai", "missing field at index 17");
        assert_eq!(a.signature(), b.signature());

        let c = AdapterError::new(ErrorKind::SchemaMismatch, "google", "missing field at index 3");
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn long_messages_truncate() {
        let err = AdapterError::new(ErrorKind::Unknown, "p", "x".repeat(2000));
        assert!(err.message.len() <= MAX_MESSAGE_LEN + 3);
    }
}
