//! Config loading: defaults -> TOML overlay -> environment overrides
//!
//! Precedence (highest wins): environment variables, the TOML file,
//! built-in defaults. Unknown TOML keys are rejected so typos surface
//! at startup instead of silently doing nothing.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use url::Url;

use crate::providers::{CircuitConfig, ProviderConfig, ProviderKind};
use crate::{Config, ConfigError};

/// Raw TOML shape: every field optional so the file can overlay
/// selectively onto the built-in defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    providers: HashMap<String, RawProvider>,
    #[serde(default)]
    aliases: IndexMap<String, String>,
    #[serde(default)]
    behaviour: RawBehaviour,
    #[serde(default)]
    circuit: Option<CircuitConfig>,
    #[serde(default)]
    healing: RawHealing,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServer {
    host: Option<String>,
    port: Option<u16>,
    state_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProvider {
    /// Required only when introducing a provider the defaults don't know
    #[serde(rename = "type")]
    kind: Option<ProviderKind>,
    base_url: Option<Url>,
    api_key_env: Option<String>,
    default_model: Option<String>,
    priority: Option<u8>,
    timeout: Option<f64>,
    enabled: Option<bool>,
    circuit: Option<CircuitConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBehaviour {
    default_provider: Option<String>,
    prefer_local: Option<bool>,
    enable_fallback: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHealing {
    enabled: Option<bool>,
    auto_apply: Option<bool>,
    auto_apply_threshold: Option<f64>,
    heal_model: Option<String>,
    error_threshold: Option<u32>,
    error_window_secs: Option<u64>,
    cooldown_seconds: Option<u64>,
    research_preference_order: Option<Vec<String>>,
    phase_budget_secs: Option<u64>,
    verify_timeout_secs: Option<u64>,
    max_versions: Option<usize>,
    pending_expiry_secs: Option<u64>,
}

impl Config {
    /// Load configuration from a TOML file, falling back to built-in
    /// defaults when the file does not exist
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or
    /// parsed, or if the merged result fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if path.exists() {
            let raw_text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let raw: RawConfig = toml::from_str(&raw_text)?;
            apply_overlay(&mut config, raw)?;
        }

        apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string over the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on parse or validation failure.
    pub fn from_toml(raw_text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let raw: RawConfig = toml::from_str(raw_text)?;
        apply_overlay(&mut config, raw)?;
        apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the merged configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a reference points nowhere or
    /// a threshold is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.providers.contains_key(&self.behaviour.default_provider) {
            return Err(ConfigError::Invalid(format!(
                "default_provider '{}' is not a configured provider",
                self.behaviour.default_provider
            )));
        }

        for (alias, target) in &self.aliases {
            if let Some((provider, _)) = target.split_once(':')
                && !self.providers.contains_key(provider)
            {
                return Err(ConfigError::Invalid(format!(
                    "alias '{alias}' targets unknown provider '{provider}'"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.healing.auto_apply_threshold) {
            return Err(ConfigError::Invalid(
                "healing.auto_apply_threshold must be within [0, 1]".to_owned(),
            ));
        }

        if self.healing.max_versions == 0 {
            return Err(ConfigError::Invalid(
                "healing.max_versions must be at least 1".to_owned(),
            ));
        }

        for name in &self.healing.research_preference_order {
            if !self.providers.contains_key(name) {
                return Err(ConfigError::Invalid(format!(
                    "healing.research_preference_order names unknown provider '{name}'"
                )));
            }
        }

        Ok(())
    }
}

fn apply_overlay(config: &mut Config, raw: RawConfig) -> Result<(), ConfigError> {
    if let Some(host) = raw.server.host {
        config.server.host = host;
    }
    if let Some(port) = raw.server.port {
        config.server.port = port;
    }
    if let Some(state_dir) = raw.server.state_dir {
        config.server.state_dir = state_dir;
    }

    for (name, overrides) in raw.providers {
        match config.providers.get_mut(&name) {
            Some(existing) => overlay_provider(existing, overrides),
            None => {
                let Some(kind) = overrides.kind else {
                    return Err(ConfigError::Invalid(format!(
                        "provider '{name}' is not a built-in and has no 'type'"
                    )));
                };
                let Some(base_url) = overrides.base_url else {
                    return Err(ConfigError::Invalid(format!(
                        "provider '{name}' is not a built-in and has no 'base_url'"
                    )));
                };
                config.providers.insert(
                    name,
                    ProviderConfig {
                        kind,
                        base_url,
                        api_key_env: overrides.api_key_env,
                        default_model: overrides.default_model.unwrap_or_default(),
                        priority: overrides.priority.unwrap_or(crate::providers::PRIORITY_FALLBACK),
                        timeout_secs: overrides.timeout.unwrap_or(60.0),
                        enabled: overrides.enabled.unwrap_or(true),
                        circuit: overrides.circuit,
                    },
                );
            }
        }
    }

    for (alias, target) in raw.aliases {
        config.aliases.insert(alias, target);
    }

    if let Some(default_provider) = raw.behaviour.default_provider {
        config.behaviour.default_provider = default_provider;
    }
    if let Some(prefer_local) = raw.behaviour.prefer_local {
        config.behaviour.prefer_local = prefer_local;
    }
    if let Some(enable_fallback) = raw.behaviour.enable_fallback {
        config.behaviour.enable_fallback = enable_fallback;
    }

    if let Some(circuit) = raw.circuit {
        config.circuit = circuit;
    }

    let healing = raw.healing;
    if let Some(enabled) = healing.enabled {
        config.healing.enabled = enabled;
    }
    if let Some(auto_apply) = healing.auto_apply {
        config.healing.auto_apply = auto_apply;
    }
    if let Some(threshold) = healing.auto_apply_threshold {
        config.healing.auto_apply_threshold = threshold;
    }
    if let Some(heal_model) = healing.heal_model {
        config.healing.heal_model = heal_model;
    }
    if let Some(error_threshold) = healing.error_threshold {
        config.healing.error_threshold = error_threshold;
    }
    if let Some(window) = healing.error_window_secs {
        config.healing.error_window_secs = window;
    }
    if let Some(cooldown) = healing.cooldown_seconds {
        config.healing.cooldown_secs = cooldown;
    }
    if let Some(order) = healing.research_preference_order {
        config.healing.research_preference_order = order;
    }
    if let Some(budget) = healing.phase_budget_secs {
        config.healing.phase_budget_secs = budget;
    }
    if let Some(verify) = healing.verify_timeout_secs {
        config.healing.verify_timeout_secs = verify;
    }
    if let Some(max_versions) = healing.max_versions {
        config.healing.max_versions = max_versions;
    }
    if let Some(expiry) = healing.pending_expiry_secs {
        config.healing.pending_expiry_secs = expiry;
    }

    Ok(())
}

fn overlay_provider(existing: &mut ProviderConfig, overrides: RawProvider) {
    if let Some(kind) = overrides.kind {
        existing.kind = kind;
    }
    if let Some(base_url) = overrides.base_url {
        existing.base_url = base_url;
    }
    if let Some(api_key_env) = overrides.api_key_env {
        existing.api_key_env = Some(api_key_env);
    }
    if let Some(default_model) = overrides.default_model {
        existing.default_model = default_model;
    }
    if let Some(priority) = overrides.priority {
        existing.priority = priority;
    }
    if let Some(timeout) = overrides.timeout {
        existing.timeout_secs = timeout;
    }
    if let Some(enabled) = overrides.enabled {
        existing.enabled = enabled;
    }
    if let Some(circuit) = overrides.circuit {
        existing.circuit = Some(circuit);
    }
}

/// Environment variable overrides, applied after the TOML overlay
fn apply_env(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(host) = std::env::var("CITADEL_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("CITADEL_PORT") {
        config.server.port = port
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("CITADEL_PORT is not a port number: {port}")))?;
    }
    if let Ok(default_provider) = std::env::var("CITADEL_DEFAULT_PROVIDER") {
        config.behaviour.default_provider = default_provider;
    }
    if let Ok(healing) = std::env::var("CITADEL_HEALING_ENABLED") {
        config.healing.enabled = matches!(healing.as_str(), "1" | "true" | "yes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = Config::load(Path::new("/nonexistent/citadel.toml")).unwrap();
        assert_eq!(config.behaviour.default_provider, "ollama");
        assert!(config.providers.contains_key("anthropic"));
        assert!(config.healing.enabled);
        assert!(!config.healing.auto_apply);
    }

    #[test]
    fn toml_overlays_selected_fields() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [providers.anthropic]
            default_model = "claude-haiku-4-5-20251001"

            [aliases]
            smart = "anthropic:claude-opus-4-5-20251101"

            [healing]
            auto_apply = true
            auto_apply_threshold = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.providers["anthropic"].default_model, "claude-haiku-4-5-20251001");
        assert_eq!(config.aliases["smart"], "anthropic:claude-opus-4-5-20251101");
        assert!(config.healing.auto_apply);
        // Untouched defaults survive the overlay
        assert_eq!(config.providers["openai"].default_model, "gpt-4.1");
    }

    #[test]
    fn unknown_toml_key_is_rejected() {
        let err = Config::from_toml("[server]\nbogus = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn new_provider_requires_type_and_url() {
        let err = Config::from_toml("[providers.mystery]\ndefault_model = \"m\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn alias_to_unknown_provider_fails_validation() {
        let err = Config::from_toml("[aliases]\nbad = \"nowhere:model\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn env_overrides_win() {
        temp_env::with_var("CITADEL_PORT", Some("7777"), || {
            let config = Config::from_toml("[server]\nport = 9000\n").unwrap();
            assert_eq!(config.server.port, 7777);
        });
    }
}
