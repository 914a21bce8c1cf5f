//! Gateway state: candidate resolution and the fallback walk
//!
//! One inbound request walks an ordered candidate list. Each candidate is
//! gated by the circuit breaker and the pause flag, runs under its own
//! deadline, and reports its outcome to the health monitor and breaker.
//! Fallback is transparent: the SCRI response shape is identical whoever
//! answered; only the lineage record tells the story.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::sync::mpsc;

use citadel_config::Config;
use citadel_llm::error::{AdapterError, AttemptError, ErrorKind, GatewayError, RouterError};
use citadel_llm::provider::{
    AdapterBinding, DriftSignal, EventStream, ProviderRegistry, build_adapter, mapping_spec, registry_from_config,
};
use citadel_llm::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Lineage, ModelCapabilities, StreamEvent,
};
use citadel_resilience::reload::ReloadSettings;
use citadel_resilience::{
    CircuitBreaker, HealSettings, HealWorker, HealthMonitor, HealthSettings, MetricsSink, ReloadManager,
};

/// One routing candidate
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: String,
    pub model: String,
}

/// Shared gateway state behind every route handler
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) circuit: Arc<CircuitBreaker>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) reload: Arc<ReloadManager>,
    pub(crate) metrics: Arc<MetricsSink>,
    pub(crate) heal_worker: Arc<HealWorker>,
}

impl Gateway {
    /// Build the full gateway: registry, resilience stack, heal worker
    ///
    /// # Errors
    ///
    /// Returns an error when a provider adapter fails to initialize or
    /// the version store is unusable.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsSink::new());

        // Soft drift signals flow from adapters into the health monitor
        let (drift_tx, mut drift_rx) = mpsc::unbounded_channel::<DriftSignal>();

        let registry = Arc::new(registry_from_config(&config, Some(&drift_tx))?);

        let circuit = Arc::new(CircuitBreaker::new(config.circuit.clone(), Arc::clone(&metrics)));
        for (name, provider_config) in &config.providers {
            if let Some(settings) = &provider_config.circuit {
                circuit.set_override(name.clone(), settings.clone());
            }
        }

        let health_settings = HealthSettings {
            error_threshold: config.healing.error_threshold,
            window: Duration::from_secs(config.healing.error_window_secs),
            cooldown: Duration::from_secs(config.healing.cooldown_secs),
            ..HealthSettings::default()
        };
        let (health, heal_rx) = HealthMonitor::new(health_settings, config.healing.enabled, Arc::clone(&metrics));

        // Reloads rebuild adapters through the same construction point
        let factory_config = Arc::clone(&config);
        let factory_drift = drift_tx.clone();
        let factory: citadel_resilience::AdapterFactory = Arc::new(move |name: &str| {
            let provider_config = factory_config.providers.get(name).ok_or_else(|| {
                AdapterError::new(ErrorKind::Unknown, name, "provider vanished from configuration")
            })?;
            build_adapter(name, provider_config, Some(factory_drift.clone()))
        });

        let reload = Arc::new(ReloadManager::new(
            ReloadSettings::from_config(&config),
            Arc::clone(&registry),
            factory,
            Arc::clone(&metrics),
        ));

        // Version store catch-up: rebind each provider at its persisted
        // live version
        for name in registry.names() {
            let provider_config = &config.providers[name.as_str()];
            let current = reload
                .register_initial(&name, mapping_spec(provider_config.kind), &provider_config.default_model)
                .await?;
            if current != registry.live_version(&name)
                && let Some(binding) = registry.get(&name)
            {
                registry.bind(&name, current, Arc::clone(&binding.adapter));
            }
        }

        let heal_worker = HealWorker::new(
            HealSettings::from_config(&config),
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&reload),
            Arc::clone(&health),
            Arc::clone(&metrics),
        );
        heal_worker.spawn(heal_rx);

        // Drain soft drift into the monitor's sliding window
        let drift_health = Arc::clone(&health);
        let drift_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some(signal) = drift_rx.recv().await {
                let version = drift_registry.live_version(&signal.provider);
                drift_health.record_error(
                    &signal.provider,
                    &signal.model,
                    signal.kind,
                    &signal.message,
                    version,
                    false,
                );
            }
        });

        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                registry,
                circuit,
                health,
                reload,
                metrics,
                heal_worker,
            }),
        })
    }

    /// Ordered candidate list for a logical model
    ///
    /// Primary (from resolution) first, then every other available
    /// provider by priority tier when fallback is enabled.
    pub(crate) fn candidates(&self, model: &str) -> Result<Vec<Candidate>, RouterError> {
        let config = &self.inner.config;
        let (primary, model_id) = config.resolve_model(model);

        let mut list = Vec::new();
        match config.provider(&primary) {
            Some(provider_config) if provider_config.is_available() => list.push(Candidate {
                provider: primary.clone(),
                model: model_id,
            }),
            Some(_) => {
                if !config.behaviour.enable_fallback {
                    return Err(RouterError::Disabled { provider: primary });
                }
            }
            None => {}
        }

        if config.behaviour.enable_fallback {
            let mut fallbacks: Vec<&String> = config
                .providers
                .keys()
                .filter(|name| **name != primary && config.providers[name.as_str()].is_available())
                .collect();
            fallbacks.sort_by_key(|name| {
                let provider_config = &config.providers[name.as_str()];
                // prefer_local keeps tier order; otherwise local servers
                // yield to cloud tiers
                if config.behaviour.prefer_local || !provider_config.is_local() {
                    (0u8, provider_config.priority)
                } else {
                    (1u8, provider_config.priority)
                }
            });
            for name in fallbacks {
                let provider_config = &config.providers[name.as_str()];
                list.push(Candidate {
                    provider: name.clone(),
                    model: provider_config.default_model.clone(),
                });
            }
        }

        if list.is_empty() {
            return Err(RouterError::NoCandidate {
                model: model.to_owned(),
            });
        }
        Ok(list)
    }

    /// Whether a candidate may be attempted right now
    fn gate(&self, provider: &str) -> bool {
        if self.inner.health.snapshot(provider).paused {
            tracing::debug!(provider, "skipping paused provider");
            return false;
        }
        let decision = self.inner.circuit.check(provider);
        if !decision.is_allowed() {
            tracing::debug!(provider, "skipping provider with open circuit");
            return false;
        }
        true
    }

    fn deadline_for(&self, provider: &str) -> Duration {
        self.inner
            .config
            .provider(provider)
            .map(|p| Duration::from_secs_f64(p.timeout_secs))
            .unwrap_or(Duration::from_secs(60))
    }

    fn record_failure(&self, provider: &str, model: &str, error: &AdapterError, version: u64) {
        self.inner
            .health
            .record_error(provider, model, error.kind, &error.message, version, true);
        self.inner.circuit.record_failure(provider, error.kind.is_structural());
    }

    fn record_success(&self, provider: &str) {
        self.inner.circuit.record_success(provider);
        self.inner.health.record_success(provider);
    }

    /// Execute a chat request with circuit gating and fallback
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let started_ms = now_ms();
        let candidates = self.candidates(&request.model)?;
        let mut attempts: Vec<AttemptError> = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if !self.gate(&candidate.provider) {
                continue;
            }
            let Some(binding) = self.inner.registry.get(&candidate.provider) else {
                continue;
            };

            let mut attempt_request = request.clone();
            attempt_request.model = candidate.model.clone();

            self.inner.metrics.record_request(&candidate.provider);
            let attempt_start = Instant::now();

            let result = self
                .invoke_chat(&binding, &candidate.provider, &attempt_request)
                .await;

            self.inner
                .metrics
                .observe_request_duration(&candidate.provider, attempt_start.elapsed().as_secs_f64());

            match result {
                Ok(mut response) => {
                    self.record_success(&candidate.provider);
                    response.lineage = Lineage {
                        provider: candidate.provider.clone(),
                        model: response.model.clone(),
                        adapter_version: binding.version,
                        started_at_ms: started_ms,
                        completed_at_ms: now_ms(),
                        attempts: attempts.len() as u32 + 1,
                        fallback: index > 0,
                    };
                    return Ok(response);
                }
                Err(error) => {
                    self.record_failure(&candidate.provider, &candidate.model, &error, binding.version);
                    if !error.kind.allows_fallback() {
                        return Err(GatewayError::Adapter(error));
                    }
                    tracing::warn!(
                        provider = %candidate.provider,
                        kind = error.kind.as_str(),
                        error = %error,
                        "candidate failed, advancing"
                    );
                    attempts.push(AttemptError {
                        provider: candidate.provider.clone(),
                        kind: error.kind,
                        message: error.message,
                    });
                }
            }
        }

        Err(RouterError::AllProvidersFailed {
            model: request.model,
            attempts,
        }
        .into())
    }

    async fn invoke_chat(
        &self,
        binding: &Arc<AdapterBinding>,
        provider: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse, AdapterError> {
        match tokio::time::timeout(self.deadline_for(provider), binding.adapter.chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::new(ErrorKind::Transient, provider, "per-call deadline exceeded")),
        }
    }

    /// Execute a streaming chat request
    ///
    /// Fallback applies to stream initiation only. The returned stream is
    /// guarded: it always ends with exactly one `finish` event, and a
    /// mid-stream provider failure is converted into a terminal
    /// `finish(error)` after being recorded against the provider.
    pub async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<(Lineage, impl futures_util::Stream<Item = StreamEvent> + Send + use<>), GatewayError> {
        let started_ms = now_ms();
        let candidates = self.candidates(&request.model)?;
        let mut attempts: Vec<AttemptError> = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if !self.gate(&candidate.provider) {
                continue;
            }
            let Some(binding) = self.inner.registry.get(&candidate.provider) else {
                continue;
            };

            let mut attempt_request = request.clone();
            attempt_request.model = candidate.model.clone();

            self.inner.metrics.record_request(&candidate.provider);

            let result = match tokio::time::timeout(
                self.deadline_for(&candidate.provider),
                binding.adapter.chat_stream(&attempt_request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AdapterError::new(
                    ErrorKind::Transient,
                    candidate.provider.clone(),
                    "per-call deadline exceeded",
                )),
            };

            match result {
                Ok(stream) => {
                    self.record_success(&candidate.provider);
                    let lineage = Lineage {
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        adapter_version: binding.version,
                        started_at_ms: started_ms,
                        completed_at_ms: 0,
                        attempts: attempts.len() as u32 + 1,
                        fallback: index > 0,
                    };
                    let guarded = self.guard_stream(stream, candidate.clone(), binding.version);
                    return Ok((lineage, guarded));
                }
                Err(error) => {
                    self.record_failure(&candidate.provider, &candidate.model, &error, binding.version);
                    if !error.kind.allows_fallback() {
                        return Err(GatewayError::Adapter(error));
                    }
                    attempts.push(AttemptError {
                        provider: candidate.provider.clone(),
                        kind: error.kind,
                        message: error.message,
                    });
                }
            }
        }

        Err(RouterError::AllProvidersFailed {
            model: request.model,
            attempts,
        }
        .into())
    }

    /// Enforce the terminal-finish contract on a provider stream
    fn guard_stream(
        &self,
        stream: EventStream,
        candidate: Candidate,
        version: u64,
    ) -> impl futures_util::Stream<Item = StreamEvent> + Send + use<> {
        let gateway = self.clone();
        let mut finished = false;

        let body = stream
            .map(Some)
            .chain(futures_util::stream::iter([None]))
            .filter_map(move |item| {
                let events: Vec<StreamEvent> = if finished {
                    Vec::new()
                } else {
                    match item {
                        Some(Ok(event)) => {
                            if event.is_finish() {
                                finished = true;
                            }
                            vec![event]
                        }
                        Some(Err(error)) => {
                            finished = true;
                            gateway.record_failure(&candidate.provider, &candidate.model, &error, version);
                            vec![StreamEvent::finish_error(error.kind.as_str(), error.message.clone())]
                        }
                        // Stream ended without a finish event: a gap is an
                        // error by contract
                        None => {
                            finished = true;
                            let error = AdapterError::new(
                                ErrorKind::StreamFormatDrift,
                                candidate.provider.clone(),
                                "stream ended without a terminal frame",
                            );
                            gateway.record_failure(&candidate.provider, &candidate.model, &error, version);
                            vec![StreamEvent::finish_error(error.kind.as_str(), error.message)]
                        }
                    }
                };
                futures_util::future::ready(if events.is_empty() { None } else { Some(events) })
            })
            .flat_map(futures_util::stream::iter);

        body
    }

    /// Execute an embedding request with the same gating and fallback
    ///
    /// Families without embeddings (anthropic, xai) are excluded while
    /// the candidate list is built, not discovered mid-walk; the walk
    /// only ever visits providers that can answer.
    pub async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, GatewayError> {
        let candidates: Vec<Candidate> = self
            .candidates(&request.model)?
            .into_iter()
            .filter(|candidate| {
                self.inner
                    .registry
                    .get(&candidate.provider)
                    .is_some_and(|binding| binding.adapter.supports_embed())
            })
            .collect();

        if candidates.is_empty() {
            return Err(RouterError::NoCandidate {
                model: request.model,
            }
            .into());
        }

        let mut attempts: Vec<AttemptError> = Vec::new();

        for candidate in &candidates {
            if !self.gate(&candidate.provider) {
                continue;
            }
            let Some(binding) = self.inner.registry.get(&candidate.provider) else {
                continue;
            };

            let mut attempt_request = request.clone();
            attempt_request.model = candidate.model.clone();

            self.inner.metrics.record_request(&candidate.provider);

            let result = match tokio::time::timeout(
                self.deadline_for(&candidate.provider),
                binding.adapter.embed(&attempt_request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AdapterError::new(
                    ErrorKind::Transient,
                    candidate.provider.clone(),
                    "per-call deadline exceeded",
                )),
            };

            match result {
                Ok(response) => {
                    self.record_success(&candidate.provider);
                    return Ok(response);
                }
                Err(error) => {
                    self.record_failure(&candidate.provider, &candidate.model, &error, binding.version);
                    if !error.kind.allows_fallback() {
                        return Err(GatewayError::Adapter(error));
                    }
                    attempts.push(AttemptError {
                        provider: candidate.provider.clone(),
                        kind: error.kind,
                        message: error.message,
                    });
                }
            }
        }

        Err(RouterError::AllProvidersFailed {
            model: request.model,
            attempts,
        }
        .into())
    }

    /// Merged model catalog across registered providers
    pub fn models(&self) -> Vec<ModelCapabilities> {
        let mut models = Vec::new();
        for name in self.inner.registry.names() {
            if let Some(binding) = self.inner.registry.get(&name) {
                models.extend(binding.adapter.list_models());
            }
        }
        models
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
