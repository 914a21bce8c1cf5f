//! Self-heal worker: diagnose -> research -> fix
//!
//! The division of labor is deliberate. The local heal model analyzes the
//! failure and later writes the fix; search-capable cloud providers are
//! only ever used as eyes: they fetch current documentation and never
//! choose the fix. Each phase runs under its own wall-clock budget and
//! writes its intermediate result into the audit trail, so a cycle that
//! dies halfway is still accountable.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use citadel_config::Config;
use citadel_llm::provider::ProviderRegistry;
use citadel_llm::types::{ChatRequest, Message, Role};

use crate::error::HealError;
use crate::health::{HealRequest, HealthMonitor};
use crate::metrics::MetricsSink;
use crate::reload::{FixOutcome, ReloadManager};

const DIAGNOSE_PROMPT: &str = "\
You are analyzing a provider adapter failure in an AI gateway.

Given the error details below, determine:
1. Whether this is a transient issue (rate limit, timeout) or a real wire-format change.
2. If the format changed, what specifically changed.
3. What search queries would find the current API documentation or changelog.

Respond with exactly this JSON shape:
{
    \"summary\": \"one-line description of the failure\",
    \"likely_cause\": \"what probably changed\",
    \"is_structural\": true,
    \"search_queries\": [\"query for current docs\", \"query for changelog\"]
}";

const FIX_PROMPT: &str = "\
You are revising the wire-format mapping for a provider adapter in an AI gateway.

You have the diagnosis, research findings from current documentation, and the
adapter's current mapping source. Produce a corrected mapping source. Be
conservative: change only what the evidence supports.

Respond with exactly this JSON shape:
{
    \"source\": \"the full corrected mapping source text\",
    \"summary\": \"one-line description of the change\",
    \"confidence\": 0.0,
    \"rationale\": \"why this addresses the failure\"
}";

/// One research finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Provider that performed the search
    pub provider: String,
    /// Query that produced the finding
    pub query: String,
    /// First URL referenced in the finding, when one was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Finding text, truncated
    pub excerpt: String,
    pub retrieved_at_ms: u64,
}

/// Output of the fix phase, consumed by the reload manager
#[derive(Debug, Clone)]
pub struct FixProposal {
    /// Full replacement mapping source
    pub source: String,
    pub summary: String,
    pub diagnosis: String,
    pub citations: Vec<Citation>,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Deserialize)]
struct DiagnosisJson {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    likely_cause: String,
    #[serde(default = "default_true")]
    is_structural: bool,
    #[serde(default)]
    search_queries: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FixJson {
    #[serde(default)]
    source: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

/// Worker settings, derived from the healing config
#[derive(Debug, Clone)]
pub struct HealSettings {
    pub heal_model: String,
    pub research_order: Vec<String>,
    pub phase_budget: Duration,
    /// Queries actually issued per cycle
    pub max_queries: usize,
}

impl HealSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heal_model: config.healing.heal_model.clone(),
            research_order: config.healing.research_preference_order.clone(),
            phase_budget: Duration::from_secs(config.healing.phase_budget_secs),
            max_queries: 3,
        }
    }
}

/// Drives heal cycles; at most one in flight per provider
pub struct HealWorker {
    settings: HealSettings,
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    reload: Arc<ReloadManager>,
    monitor: Arc<HealthMonitor>,
    metrics: Arc<MetricsSink>,
    inflight: DashMap<String, CancellationToken>,
}

impl HealWorker {
    pub fn new(
        settings: HealSettings,
        config: Arc<Config>,
        registry: Arc<ProviderRegistry>,
        reload: Arc<ReloadManager>,
        monitor: Arc<HealthMonitor>,
        metrics: Arc<MetricsSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            config,
            registry,
            reload,
            monitor,
            metrics,
            inflight: DashMap::new(),
        })
    }

    /// Consume heal requests until the channel closes
    ///
    /// Cycles run as independent tasks off the request-serving path;
    /// concurrent triggers for one provider collapse into the running
    /// cycle.
    pub fn spawn(self: &Arc<Self>, mut rx: mpsc::Receiver<HealRequest>) -> tokio::task::JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let provider = request.provider.clone();
                if worker.inflight.contains_key(&provider) {
                    tracing::debug!(provider = %provider, "heal cycle already in flight, collapsing trigger");
                    continue;
                }
                let token = CancellationToken::new();
                worker.inflight.insert(provider.clone(), token.clone());

                let cycle_worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    tokio::select! {
                        () = token.cancelled() => {
                            tracing::info!(provider = %request.provider, "heal cycle cancelled");
                            cycle_worker.monitor.heal_complete(&request.provider, false);
                        }
                        () = cycle_worker.run_cycle(&request) => {}
                    }
                    cycle_worker.inflight.remove(&request.provider);
                });
            }
        })
    }

    /// Cancel an in-flight cycle, leaving the provider on its pre-cycle
    /// adapter version
    pub fn cancel(&self, provider: &str) {
        if let Some(entry) = self.inflight.get(provider) {
            entry.value().cancel();
        }
    }

    async fn run_cycle(&self, request: &HealRequest) {
        let provider = &request.provider;
        let started = Instant::now();
        self.reload
            .audit(provider, "heal_start", serde_json::json!({ "errors": request.recent_errors.len() }))
            .await;

        match self.run_phases(request).await {
            Ok(Some(outcome)) => {
                let committed = matches!(outcome, FixOutcome::Committed { .. });
                self.monitor.heal_complete(provider, committed);
            }
            Ok(None) => {
                // Diagnosis called it noise; window already decayed
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "heal cycle failed");
                self.monitor.heal_complete(provider, false);
                self.reload
                    .audit(provider, "heal_failed", serde_json::json!({ "kind": e.kind(), "message": e.to_string() }))
                    .await;
            }
        }

        self.metrics
            .observe_heal_duration(provider, started.elapsed().as_secs_f64());
    }

    async fn run_phases(&self, request: &HealRequest) -> Result<Option<FixOutcome>, HealError> {
        let provider = &request.provider;
        let budget = self.settings.phase_budget;

        // Phase 1: diagnose, locally
        let diagnosis = tokio::time::timeout(budget, self.phase_diagnose(request))
            .await
            .map_err(|_| HealError::DiagnosisFailed {
                provider: provider.clone(),
                message: "phase budget exhausted".to_owned(),
            })??;

        self.reload
            .audit(
                provider,
                "diagnosis",
                serde_json::json!({
                    "summary": diagnosis.summary,
                    "likely_cause": diagnosis.likely_cause,
                    "is_structural": diagnosis.is_structural,
                }),
            )
            .await;

        if !diagnosis.is_structural {
            tracing::info!(provider = %provider, "diagnosis: not structural, decaying error window");
            self.monitor.decay_window(provider);
            self.monitor.heal_complete(provider, false);
            return Ok(None);
        }

        // Phase 2: research, through search-capable cloud providers
        let citations = tokio::time::timeout(budget, self.phase_research(provider, &diagnosis))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(provider = %provider, "research budget exhausted, fixing without docs");
                Vec::new()
            });

        self.reload
            .audit(provider, "research", serde_json::json!({ "citations": citations.len() }))
            .await;

        // Phase 3: fix, locally
        let proposal = tokio::time::timeout(budget, self.phase_fix(request, &diagnosis, citations))
            .await
            .map_err(|_| HealError::FixFailed {
                provider: provider.clone(),
                message: "phase budget exhausted".to_owned(),
            })??;

        tracing::info!(
            provider = %provider,
            confidence = proposal.confidence,
            summary = %proposal.summary,
            "fix generated"
        );

        let outcome = self.reload.apply_fix(provider, proposal).await?;
        Ok(Some(outcome))
    }

    async fn phase_diagnose(&self, request: &HealRequest) -> Result<DiagnosisJson, HealError> {
        let provider = &request.provider;
        let adapter_source = self.reload.current_source(provider).await.unwrap_or_default();

        let mut prompt = format!("## Adapter Failure Report\nProvider: {provider}\n");
        if let Some(latest) = request.recent_errors.last() {
            prompt.push_str(&format!(
                "Model: {}\nError kind: {}\nError message: {}\n",
                latest.model,
                latest.kind.as_str(),
                scrub(&latest.message),
            ));
        }
        if !request.recent_errors.is_empty() {
            prompt.push_str("\n## Recent Errors\n");
            for (i, error) in request.recent_errors.iter().enumerate() {
                prompt.push_str(&format!(
                    "{}. [{}] {}\n",
                    i + 1,
                    error.kind.as_str(),
                    truncate(&scrub(&error.message), 200),
                ));
            }
        }
        if !adapter_source.is_empty() {
            prompt.push_str(&format!(
                "\n## Current Adapter Mapping\n{}\n",
                truncate(&adapter_source, 6000)
            ));
        }

        let response = self
            .call_model(&self.settings.heal_model, DIAGNOSE_PROMPT, &prompt, false)
            .await
            .map_err(|message| HealError::DiagnosisFailed {
                provider: provider.clone(),
                message,
            })?;

        Ok(parse_json_block::<DiagnosisJson>(&response).unwrap_or_else(|| DiagnosisJson {
            summary: truncate(&response, 500),
            likely_cause: String::new(),
            is_structural: true,
            search_queries: vec![format!("{provider} API changelog latest")],
        }))
    }

    /// Walk the research preference list per query; providers here are
    /// tools, nothing more
    async fn phase_research(&self, failing_provider: &str, diagnosis: &DiagnosisJson) -> Vec<Citation> {
        let queries: Vec<String> = if diagnosis.search_queries.is_empty() {
            vec![format!("{failing_provider} API documentation latest changes")]
        } else {
            diagnosis
                .search_queries
                .iter()
                .take(self.settings.max_queries)
                .cloned()
                .collect()
        };

        let system = "You are a research assistant finding current API documentation. \
                      Search for the most recent information and summarize schema changes, \
                      new fields, deprecated fields, and format changes. Cite source URLs.";

        let mut citations = Vec::new();

        for query in &queries {
            for candidate in &self.settings.research_order {
                // The failing provider cannot be trusted to research itself
                if candidate == failing_provider || self.registry.get(candidate).is_none() {
                    continue;
                }

                let prompt = format!(
                    "Search for: {query}\n\nContext: the {failing_provider} API appears to have \
                     changed ({cause}). Report what the current documentation says about its \
                     request and response schemas.",
                    cause = diagnosis.likely_cause,
                );

                match self.call_research(candidate, system, &prompt).await {
                    Ok(text) if text.trim().len() > 50 => {
                        citations.push(Citation {
                            provider: candidate.clone(),
                            query: query.clone(),
                            url: first_url(&text),
                            excerpt: truncate(&text, 1500),
                            retrieved_at_ms: now_ms(),
                        });
                        break;
                    }
                    Ok(_) => {
                        tracing::debug!(provider = %candidate, query = %query, "research answer too thin, trying next");
                    }
                    Err(message) => {
                        tracing::debug!(provider = %candidate, query = %query, message = %message, "research provider failed, trying next");
                    }
                }
            }
        }

        if citations.is_empty() {
            tracing::warn!(provider = failing_provider, "no research findings, fix will rely on diagnosis alone");
        }
        citations
    }

    async fn phase_fix(
        &self,
        request: &HealRequest,
        diagnosis: &DiagnosisJson,
        citations: Vec<Citation>,
    ) -> Result<FixProposal, HealError> {
        let provider = &request.provider;
        let adapter_source = self.reload.current_source(provider).await.unwrap_or_default();

        let mut prompt = format!(
            "## Failure\nProvider: {provider}\n\n## Diagnosis\n{}\nLikely cause: {}\n",
            diagnosis.summary, diagnosis.likely_cause,
        );
        if !citations.is_empty() {
            prompt.push_str("\n## Research Findings\n");
            for citation in &citations {
                prompt.push_str(&format!(
                    "- [{} via {}] {}\n",
                    citation.query,
                    citation.provider,
                    truncate(&citation.excerpt, 2000),
                ));
            }
        }
        prompt.push_str(&format!(
            "\n## Current Adapter Mapping\n{}\n",
            truncate(&adapter_source, 6000)
        ));

        let response = self
            .call_model(&self.settings.heal_model, FIX_PROMPT, &prompt, false)
            .await
            .map_err(|message| HealError::FixFailed {
                provider: provider.clone(),
                message,
            })?;

        let fix: FixJson = parse_json_block(&response).ok_or_else(|| HealError::FixFailed {
            provider: provider.clone(),
            message: format!("fix response was not the expected JSON: {}", truncate(&response, 200)),
        })?;

        if fix.source.trim().is_empty() {
            return Err(HealError::FixFailed {
                provider: provider.clone(),
                message: "fix carried no source".to_owned(),
            });
        }

        Ok(FixProposal {
            source: fix.source,
            summary: if fix.summary.is_empty() {
                diagnosis.summary.clone()
            } else {
                fix.summary
            },
            diagnosis: diagnosis.summary.clone(),
            citations,
            confidence: fix.confidence.clamp(0.0, 1.0),
            rationale: fix.rationale,
        })
    }

    /// Call a model through the gateway's own provider stack
    async fn call_model(
        &self,
        alias: &str,
        system: &str,
        user: &str,
        web_search: bool,
    ) -> Result<String, String> {
        let (provider_name, model_id) = self.config.resolve_model(alias);
        let binding = self
            .registry
            .get(&provider_name)
            .ok_or_else(|| format!("provider '{provider_name}' is not registered"))?;

        let mut request = ChatRequest {
            messages: vec![Message::text(Role::System, system), Message::text(Role::User, user)],
            model: model_id,
            temperature: Some(0.2),
            max_tokens: Some(3000),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        };
        if web_search {
            request.metadata.insert("web_search".to_owned(), "true".to_owned());
        }

        let response = binding.adapter.chat(&request).await.map_err(|e| e.to_string())?;
        Ok(response.content.as_text())
    }

    async fn call_research(&self, provider: &str, system: &str, user: &str) -> Result<String, String> {
        let model = self
            .config
            .provider(provider)
            .map(|p| p.default_model.clone())
            .unwrap_or_default();
        let alias = if model.is_empty() {
            provider.to_owned()
        } else {
            format!("{provider}:{model}")
        };
        self.call_model(&alias, system, user, true).await
    }
}

/// Extract JSON from a model response, tolerating markdown code fences
fn parse_json_block<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let cleaned = strip_fences(text);
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }
    // Last resort: the first brace-balanced span
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    serde_json::from_str(&cleaned[start..=end]).ok()
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence)
            && let Some(end) = rest.find("```")
        {
            return rest[..end].trim();
        }
    }
    trimmed
}

/// Redact credential-shaped and personal substrings before they reach a
/// prompt
fn scrub(text: &str) -> String {
    static PATTERNS: std::sync::OnceLock<Vec<regex::Regex>> = std::sync::OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"sk-[A-Za-z0-9_-]{8,}",
            r"(?i)bearer\s+[A-Za-z0-9._-]{8,}",
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        ]
        .iter()
        .filter_map(|p| regex::Regex::new(p).ok())
        .collect()
    });

    let mut result = text.to_owned();
    for pattern in patterns {
        result = pattern.replace_all(&result, "[redacted]").into_owned();
    }
    result
}

fn first_url(text: &str) -> Option<String> {
    static URL: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let url = URL.get_or_init(|| regex::Regex::new(r#"https?://[^\s)"'<>\]]+"#).expect("valid regex"));
    url.find(text).map(|m| m.as_str().to_owned())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_owned();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let text = "Here you go:\n```json\n{\"summary\": \"s\", \"is_structural\": false, \"search_queries\": []}\n```";
        let parsed: DiagnosisJson = parse_json_block(text).unwrap();
        assert!(!parsed.is_structural);
        assert_eq!(parsed.summary, "s");
    }

    #[test]
    fn parses_bare_json_with_prose_around_it() {
        let text = "Sure. {\"source\": \"x\", \"summary\": \"y\", \"confidence\": 0.7, \"rationale\": \"z\"} hope that helps";
        let parsed: FixJson = parse_json_block(text).unwrap();
        assert_eq!(parsed.source, "x");
        assert!((parsed.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn unparseable_returns_none() {
        assert!(parse_json_block::<FixJson>("no json here at all").is_none());
    }

    #[test]
    fn scrub_redacts_credentials_and_emails() {
        let scrubbed = scrub("auth failed for ops@example.com with key sk-abc123def456ghi");
        assert!(!scrubbed.contains("ops@example.com"));
        assert!(!scrubbed.contains("sk-abc123def456ghi"));
        assert!(scrubbed.contains("[redacted]"));
    }

    #[test]
    fn first_url_finds_links() {
        let text = "see https://docs.example.com/api/changelog) for details";
        assert_eq!(first_url(text).as_deref(), Some("https://docs.example.com/api/changelog"));
        assert!(first_url("no links").is_none());
    }
}
