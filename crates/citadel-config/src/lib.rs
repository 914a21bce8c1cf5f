//! Configuration for the Citadel gateway
//!
//! Built-in defaults cover the five stock provider families; a TOML file
//! overlays onto them and environment variables overlay onto the TOML.
//! API-key material is never stored in config files; providers carry the
//! *name* of the environment variable holding their key.

#![allow(clippy::must_use_candidate)]

mod error;
mod healing;
mod loader;
mod providers;
mod resolve;
mod server;

use indexmap::IndexMap;

pub use error::ConfigError;
pub use healing::HealingConfig;
pub use providers::{CircuitConfig, ProviderConfig, ProviderKind, default_aliases, default_providers};
pub use server::ServerConfig;

/// Top-level gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind configuration
    pub server: ServerConfig,
    /// Provider configurations keyed by name, in priority-relevant order
    pub providers: IndexMap<String, ProviderConfig>,
    /// Model alias table: human-friendly name -> `provider:model`
    pub aliases: IndexMap<String, String>,
    /// Routing behaviour
    pub behaviour: BehaviourConfig,
    /// Circuit breaker defaults (per-provider overrides live on the provider)
    pub circuit: CircuitConfig,
    /// Self-healing configuration
    pub healing: HealingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: default_providers(),
            aliases: default_aliases(),
            behaviour: BehaviourConfig::default(),
            circuit: CircuitConfig::default(),
            healing: HealingConfig::default(),
        }
    }
}

/// Routing behaviour knobs
#[derive(Debug, Clone)]
pub struct BehaviourConfig {
    /// Provider used when resolution finds nothing better
    pub default_provider: String,
    /// Prefer local providers when ordering fallback candidates
    pub prefer_local: bool,
    /// Walk the fallback list when the primary candidate fails
    pub enable_fallback: bool,
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            default_provider: "ollama".to_owned(),
            prefer_local: true,
            enable_fallback: true,
        }
    }
}

impl Config {
    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Names of providers that are enabled and have their credentials
    /// present, ordered by priority (local tiers first)
    pub fn available_providers(&self) -> Vec<String> {
        let mut names: Vec<&String> = self
            .providers
            .iter()
            .filter(|(_, p)| p.is_available())
            .map(|(name, _)| name)
            .collect();
        names.sort_by_key(|name| self.providers[name.as_str()].priority);
        names.into_iter().cloned().collect()
    }
}
