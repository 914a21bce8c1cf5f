//! Programmatic config construction for tests

use std::path::Path;

use citadel_config::{BehaviourConfig, CircuitConfig, Config, ProviderConfig, ProviderKind};
use url::Url;

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from an empty provider table with healing off and state
    /// under the given directory
    pub fn new(state_dir: &Path) -> Self {
        let mut config = Config::default();
        config.providers.clear();
        config.aliases.clear();
        config.server.state_dir = state_dir.join("state");
        config.behaviour = BehaviourConfig {
            default_provider: String::new(),
            prefer_local: true,
            enable_fallback: true,
        };
        config.healing.enabled = false;
        Self { config }
    }

    /// Add a local (OpenAI-compatible) provider backed by a mock
    pub fn with_provider(mut self, name: &str, base_url: &str, priority: u8) -> Self {
        self.config.providers.insert(
            name.to_owned(),
            ProviderConfig {
                kind: ProviderKind::Local,
                base_url: Url::parse(base_url).expect("mock URL must parse"),
                api_key_env: None,
                default_model: "mock-model".to_owned(),
                priority,
                timeout_secs: 5.0,
                enabled: true,
                circuit: None,
            },
        );
        if self.config.behaviour.default_provider.is_empty() {
            self.config.behaviour.default_provider = name.to_owned();
        }
        self
    }

    pub fn default_provider(mut self, name: &str) -> Self {
        self.config.behaviour.default_provider = name.to_owned();
        self
    }

    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        self.config.aliases.insert(alias.to_owned(), target.to_owned());
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.config.behaviour.enable_fallback = enabled;
        self
    }

    pub fn circuit(mut self, failure_threshold: u32, success_threshold: u32, recovery_secs: u64) -> Self {
        self.config.circuit = CircuitConfig {
            failure_threshold,
            success_threshold,
            recovery_timeout_secs: recovery_secs,
        };
        self
    }

    /// Enable healing with the given gates
    pub fn healing(mut self, auto_apply: bool, auto_apply_threshold: f64, error_threshold: u32) -> Self {
        self.config.healing.enabled = true;
        self.config.healing.auto_apply = auto_apply;
        self.config.healing.auto_apply_threshold = auto_apply_threshold;
        self.config.healing.error_threshold = error_threshold;
        self
    }

    /// Model alias the heal worker diagnoses and fixes with
    pub fn heal_model(mut self, alias: &str) -> Self {
        self.config.healing.heal_model = alias.to_owned();
        self
    }

    /// Providers walked during the research phase
    pub fn research_order(mut self, providers: &[&str]) -> Self {
        self.config.healing.research_preference_order = providers.iter().map(|&p| p.to_owned()).collect();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
