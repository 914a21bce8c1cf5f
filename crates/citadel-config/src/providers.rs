use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Local providers share the highest priority tier; cloud tiers follow.
/// Lower number wins when ordering fallback candidates.
pub const PRIORITY_LOCAL: u8 = 0;
pub const PRIORITY_PRIMARY: u8 = 1;
pub const PRIORITY_SECONDARY: u8 = 2;
pub const PRIORITY_TERTIARY: u8 = 3;
pub const PRIORITY_FALLBACK: u8 = 4;

/// Wire-format family a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI Chat Completions API
    Openai,
    /// Google Generative Language API
    Google,
    /// xAI Grok (OpenAI-compatible, with server-side search)
    Xai,
    /// Local OpenAI-compatible server (Ollama, vLLM, llama.cpp)
    Local,
}

/// Configuration for one provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Wire-format family
    pub kind: ProviderKind,
    /// Base URL for the provider's API
    pub base_url: Url,
    /// Name of the environment variable holding the API key.
    /// `None` for local providers: no key, nothing leaves the machine.
    pub api_key_env: Option<String>,
    /// Model used when a request resolves to this provider without one
    pub default_model: String,
    /// Fallback ordering tier (lower = preferred)
    pub priority: u8,
    /// Per-call deadline in seconds
    pub timeout_secs: f64,
    /// Whether this provider participates in routing
    pub enabled: bool,
    /// Circuit-breaker overrides for this provider
    pub circuit: Option<CircuitConfig>,
}

impl ProviderConfig {
    /// Read the API key from the environment
    ///
    /// Key material is only ever read from the environment. It is never
    /// persisted and never logged.
    pub fn api_key(&self) -> Option<SecretString> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().map(SecretString::from)
    }

    /// Whether the provider is enabled and its credentials are present
    pub fn is_available(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).is_ok_and(|v| !v.is_empty()),
            None => true,
        }
    }

    /// Whether this provider runs on the local machine
    pub const fn is_local(&self) -> bool {
        matches!(self.kind, ProviderKind::Local)
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitConfig {
    /// Consecutive structural failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open probe successes before the circuit closes
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Seconds an open circuit waits before allowing probes
    #[serde(default = "default_recovery_secs")]
    pub recovery_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_recovery_secs() -> u64 {
    30
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_secs(),
        }
    }
}

fn parse_url(s: &str) -> Url {
    Url::parse(s).expect("built-in provider URL must be valid")
}

/// Built-in provider definitions
///
/// TOML overlays onto these; providers not mentioned in the file keep
/// their defaults. Cloud providers stay dormant until their key appears
/// in the environment.
pub fn default_providers() -> IndexMap<String, ProviderConfig> {
    let mut providers = IndexMap::new();

    providers.insert(
        "ollama".to_owned(),
        ProviderConfig {
            kind: ProviderKind::Local,
            base_url: parse_url(
                &std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_owned()),
            ),
            api_key_env: None,
            default_model: "llama3.1:8b".to_owned(),
            priority: PRIORITY_LOCAL,
            timeout_secs: 120.0,
            enabled: true,
            circuit: None,
        },
    );

    providers.insert(
        "anthropic".to_owned(),
        ProviderConfig {
            kind: ProviderKind::Anthropic,
            base_url: parse_url("https://api.anthropic.com/v1"),
            api_key_env: Some("ANTHROPIC_API_KEY".to_owned()),
            default_model: "claude-sonnet-4-5-20250929".to_owned(),
            priority: PRIORITY_PRIMARY,
            timeout_secs: 60.0,
            enabled: true,
            circuit: None,
        },
    );

    providers.insert(
        "openai".to_owned(),
        ProviderConfig {
            kind: ProviderKind::Openai,
            base_url: parse_url("https://api.openai.com/v1"),
            api_key_env: Some("OPENAI_API_KEY".to_owned()),
            default_model: "gpt-4.1".to_owned(),
            priority: PRIORITY_SECONDARY,
            timeout_secs: 60.0,
            enabled: true,
            circuit: None,
        },
    );

    providers.insert(
        "google".to_owned(),
        ProviderConfig {
            kind: ProviderKind::Google,
            base_url: parse_url("https://generativelanguage.googleapis.com/v1beta"),
            api_key_env: Some("GOOGLE_API_KEY".to_owned()),
            default_model: "gemini-2.5-flash".to_owned(),
            priority: PRIORITY_TERTIARY,
            timeout_secs: 60.0,
            enabled: true,
            circuit: None,
        },
    );

    providers.insert(
        "xai".to_owned(),
        ProviderConfig {
            kind: ProviderKind::Xai,
            base_url: parse_url("https://api.x.ai/v1"),
            api_key_env: Some("XAI_API_KEY".to_owned()),
            default_model: "grok-4-fast".to_owned(),
            priority: PRIORITY_FALLBACK,
            timeout_secs: 60.0,
            enabled: true,
            circuit: None,
        },
    );

    providers
}

/// Built-in alias table: the names people actually type
pub fn default_aliases() -> IndexMap<String, String> {
    let entries = [
        // Use-case aliases
        ("fast", "google:gemini-2.5-flash"),
        ("reason", "anthropic:claude-opus-4-5-20251101"),
        ("code", "anthropic:claude-sonnet-4-5-20250929"),
        ("cheap", "google:gemini-2.5-flash-lite"),
        ("local", "ollama:llama3.1:8b"),
        ("sovereign", "ollama:llama3.1:8b"),
        // Family shorthands
        ("opus", "anthropic:claude-opus-4-5-20251101"),
        ("sonnet", "anthropic:claude-sonnet-4-5-20250929"),
        ("haiku", "anthropic:claude-haiku-4-5-20251001"),
        ("gpt", "openai:gpt-4.1"),
        ("gpt-mini", "openai:gpt-4.1-mini"),
        ("gemini", "google:gemini-2.5-flash"),
        ("grok", "xai:grok-4-fast"),
        // Embeddings
        ("embed", "openai:text-embedding-3-large"),
        ("embed-small", "openai:text-embedding-3-small"),
    ];

    entries
        .into_iter()
        .map(|(alias, target)| (alias.to_owned(), target.to_owned()))
        .collect()
}
