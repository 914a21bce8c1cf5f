//! Logical model resolution
//!
//! A model string resolves to a `(provider, model_id)` pair through a
//! deterministic four-step order; the first match wins.

use crate::Config;

impl Config {
    /// Resolve a model string to `(provider, model_id)`
    ///
    /// Resolution order:
    /// 1. alias table (`"fast"` -> `google:gemini-2.5-flash`)
    /// 2. explicit `provider:model`
    /// 3. name-prefix inference from known model families
    /// 4. the configured default provider
    pub fn resolve_model(&self, name: &str) -> (String, String) {
        // 1. Alias table
        if let Some(target) = self.aliases.get(name) {
            if let Some((provider, model)) = split_known_provider(target, self) {
                return (provider, model);
            }
            return (self.behaviour.default_provider.clone(), target.clone());
        }

        // 2. Explicit provider:model
        if let Some((provider, model)) = split_known_provider(name, self) {
            return (provider, model);
        }

        // 3. Family-prefix inference
        if let Some(provider) = infer_family(name) {
            if self.providers.contains_key(provider) {
                return (provider.to_owned(), name.to_owned());
            }
        }

        // 4. Default provider
        (self.behaviour.default_provider.clone(), name.to_owned())
    }
}

/// Split `provider:model`, but only when the prefix names a configured
/// provider, since local model tags like `llama3.1:8b` also contain colons
fn split_known_provider(s: &str, config: &Config) -> Option<(String, String)> {
    let (prefix, rest) = s.split_once(':')?;
    if config.providers.contains_key(prefix) {
        Some((prefix.to_owned(), rest.to_owned()))
    } else {
        None
    }
}

/// Map a bare model name to its provider family by prefix
fn infer_family(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    if lower.contains("claude") {
        return Some("anthropic");
    }
    if ["gpt", "o1", "o3", "o4", "codex", "text-embedding"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return Some("openai");
    }
    if lower.contains("gemini") {
        return Some("google");
    }
    if lower.contains("grok") {
        return Some("xai");
    }
    if ["llama", "mistral", "qwen", "phi", "deepseek", "gemma"]
        .iter()
        .any(|family| lower.contains(family))
    {
        return Some("ollama");
    }
    None
}

#[cfg(test)]
mod tests {
    use crate::Config;

    #[test]
    fn alias_wins() {
        let config = Config::default();
        let (provider, model) = config.resolve_model("reason");
        assert_eq!(provider, "anthropic");
        assert_eq!(model, "claude-opus-4-5-20251101");
    }

    #[test]
    fn explicit_provider_model() {
        let config = Config::default();
        let (provider, model) = config.resolve_model("openai:gpt-4.1-mini");
        assert_eq!(provider, "openai");
        assert_eq!(model, "gpt-4.1-mini");
    }

    #[test]
    fn family_prefix_inference() {
        let config = Config::default();
        assert_eq!(config.resolve_model("claude-sonnet-4-5-20250929").0, "anthropic");
        assert_eq!(config.resolve_model("gpt-4.1-nano").0, "openai");
        assert_eq!(config.resolve_model("gemini-2.5-pro").0, "google");
        assert_eq!(config.resolve_model("grok-4").0, "xai");
        assert_eq!(config.resolve_model("qwen2.5-coder").0, "ollama");
    }

    #[test]
    fn local_model_tag_colon_is_not_a_provider() {
        let config = Config::default();
        let (provider, model) = config.resolve_model("llama3.1:8b");
        assert_eq!(provider, "ollama");
        assert_eq!(model, "llama3.1:8b");
    }

    #[test]
    fn unknown_name_falls_back_to_default() {
        let config = Config::default();
        let (provider, model) = config.resolve_model("totally-unknown-model");
        assert_eq!(provider, "ollama");
        assert_eq!(model, "totally-unknown-model");
    }
}
