/// Self-healing configuration
#[derive(Debug, Clone)]
pub struct HealingConfig {
    /// Master switch for the heal pipeline
    pub enabled: bool,
    /// Apply fixes without human approval when confidence clears the bar
    pub auto_apply: bool,
    /// Minimum confidence for auto-apply
    pub auto_apply_threshold: f64,
    /// Model alias used for diagnosis and fix generation
    pub heal_model: String,
    /// Structural errors within the window before a heal cycle fires
    pub error_threshold: u32,
    /// Sliding-window width for structural error counting, seconds
    pub error_window_secs: u64,
    /// Quiet period after a heal dispatch, seconds
    pub cooldown_secs: u64,
    /// Providers tried, in order, for the research phase
    pub research_preference_order: Vec<String>,
    /// Wall-clock budget for each heal phase, seconds
    pub phase_budget_secs: u64,
    /// Reload verification budget, seconds
    pub verify_timeout_secs: u64,
    /// Retained adapter versions per provider
    pub max_versions: usize,
    /// Age at which an unresolved pending fix expires, seconds
    pub pending_expiry_secs: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_apply: false,
            auto_apply_threshold: 0.8,
            heal_model: "local".to_owned(),
            error_threshold: 3,
            error_window_secs: 300,
            cooldown_secs: 600,
            research_preference_order: vec![
                "xai".to_owned(),
                "openai".to_owned(),
                "google".to_owned(),
                "anthropic".to_owned(),
            ],
            phase_budget_secs: 120,
            verify_timeout_secs: 10,
            max_versions: 10,
            pending_expiry_secs: 7 * 24 * 60 * 60,
        }
    }
}
