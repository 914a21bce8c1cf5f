//! Per-provider circuit breaker
//!
//! Three states per provider: closed (normal), open (fail fast), and
//! half-open (bounded probing). Only structural errors count toward the
//! closed-state failure threshold, so a rate-limit storm cannot trip the
//! breaker and mask recovery. Any probe failure in half-open reopens
//! immediately.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

use citadel_config::CircuitConfig;

use crate::metrics::MetricsSink;

/// Circuit state for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow through
    Closed,
    /// Provider is failing; calls are skipped without invoking the adapter
    Open,
    /// Recovery probing with a bounded probe budget
    HalfOpen,
}

/// Outcome of consulting the breaker before a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Proceed with the call
    Allow,
    /// Proceed, consuming one unit of half-open probe budget
    AllowProbe,
    /// Skip this provider
    Skip {
        /// Seconds until the circuit next allows probing (0 when unknown)
        retry_in_secs: u64,
    },
}

impl CircuitDecision {
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::AllowProbe)
    }
}

#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    probe_budget: u32,
    open_until: Option<Instant>,
    last_failure_ms: Option<u64>,
    last_success_ms: Option<u64>,
    settings: CircuitConfig,
}

impl CircuitEntry {
    fn new(settings: CircuitConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            probe_budget: 0,
            open_until: None,
            last_failure_ms: None,
            last_success_ms: None,
            settings,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.open_until = Some(Instant::now() + Duration::from_secs(self.settings.recovery_timeout_secs));
        self.half_open_successes = 0;
        self.probe_budget = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.probe_budget = 0;
        self.open_until = None;
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.half_open_successes = 0;
        self.probe_budget = self.settings.success_threshold;
        self.open_until = None;
    }
}

/// Serializable view of one circuit
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    /// Unix milliseconds after which the circuit allows probing
    pub open_until_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_success_ms: Option<u64>,
}

/// Per-provider fail-fast state machine
pub struct CircuitBreaker {
    circuits: DashMap<String, CircuitEntry>,
    defaults: CircuitConfig,
    overrides: DashMap<String, CircuitConfig>,
    metrics: Arc<MetricsSink>,
}

impl CircuitBreaker {
    pub fn new(defaults: CircuitConfig, metrics: Arc<MetricsSink>) -> Self {
        Self {
            circuits: DashMap::new(),
            defaults,
            overrides: DashMap::new(),
            metrics,
        }
    }

    /// Register per-provider tuning (from provider config)
    pub fn set_override(&self, provider: impl Into<String>, settings: CircuitConfig) {
        self.overrides.insert(provider.into(), settings);
    }

    fn settings_for(&self, provider: &str) -> CircuitConfig {
        self.overrides
            .get(provider)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Consult the breaker before invoking a provider
    ///
    /// Handles the open -> half-open transition when the recovery timeout
    /// has elapsed, and hands out half-open probe budget one unit at a
    /// time.
    pub fn check(&self, provider: &str) -> CircuitDecision {
        let mut entry = self
            .circuits
            .entry(provider.to_owned())
            .or_insert_with(|| CircuitEntry::new(self.settings_for(provider)));

        match entry.state {
            CircuitState::Closed => CircuitDecision::Allow,
            CircuitState::Open => {
                let elapsed = entry.open_until.is_none_or(|until| Instant::now() >= until);
                if elapsed {
                    entry.half_open();
                    tracing::info!(provider, "circuit half-open, probing");
                    entry.probe_budget -= 1;
                    CircuitDecision::AllowProbe
                } else {
                    let retry_in_secs = entry
                        .open_until
                        .map(|until| until.saturating_duration_since(Instant::now()).as_secs())
                        .unwrap_or(0);
                    CircuitDecision::Skip { retry_in_secs }
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_budget > 0 {
                    entry.probe_budget -= 1;
                    CircuitDecision::AllowProbe
                } else {
                    CircuitDecision::Skip { retry_in_secs: 0 }
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, provider: &str) {
        let mut entry = self
            .circuits
            .entry(provider.to_owned())
            .or_insert_with(|| CircuitEntry::new(self.settings_for(provider)));

        entry.last_success_ms = Some(now_ms());
        entry.consecutive_failures = 0;

        if entry.state == CircuitState::HalfOpen {
            entry.half_open_successes += 1;
            if entry.half_open_successes >= entry.settings.success_threshold {
                entry.close();
                drop(entry);
                tracing::info!(provider, "circuit closed after successful probes");
                self.update_open_gauge();
            }
        }
    }

    /// Record a failed call
    ///
    /// `structural` selects whether the failure counts toward the
    /// closed-state threshold. Half-open probe failures reopen regardless.
    pub fn record_failure(&self, provider: &str, structural: bool) {
        let mut entry = self
            .circuits
            .entry(provider.to_owned())
            .or_insert_with(|| CircuitEntry::new(self.settings_for(provider)));

        entry.last_failure_ms = Some(now_ms());

        match entry.state {
            CircuitState::HalfOpen => {
                entry.open();
                drop(entry);
                tracing::warn!(provider, "probe failed, circuit reopened");
                self.metrics.record_circuit_open(provider);
                self.update_open_gauge();
            }
            CircuitState::Closed if structural => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= entry.settings.failure_threshold {
                    entry.open();
                    let failures = entry.consecutive_failures;
                    drop(entry);
                    tracing::warn!(provider, consecutive_failures = failures, "circuit opened");
                    self.metrics.record_circuit_open(provider);
                    self.update_open_gauge();
                }
            }
            _ => {}
        }
    }

    /// Administrative transitions ignore thresholds entirely

    pub fn force_open(&self, provider: &str) {
        let mut entry = self
            .circuits
            .entry(provider.to_owned())
            .or_insert_with(|| CircuitEntry::new(self.settings_for(provider)));
        entry.open();
        drop(entry);
        self.metrics.record_admin_transition(provider, "force_open");
        self.update_open_gauge();
    }

    pub fn force_close(&self, provider: &str) {
        let mut entry = self
            .circuits
            .entry(provider.to_owned())
            .or_insert_with(|| CircuitEntry::new(self.settings_for(provider)));
        entry.close();
        drop(entry);
        self.metrics.record_admin_transition(provider, "force_close");
        self.update_open_gauge();
    }

    pub fn reset(&self, provider: &str) {
        self.circuits.remove(provider);
        self.metrics.record_admin_transition(provider, "reset");
        self.update_open_gauge();
    }

    /// Current state without consuming probe budget
    pub fn state(&self, provider: &str) -> CircuitState {
        self.circuits.get(provider).map_or(CircuitState::Closed, |entry| entry.state)
    }

    /// Snapshot for one provider
    pub fn snapshot(&self, provider: &str) -> CircuitSnapshot {
        self.circuits.get(provider).map_or_else(
            || CircuitSnapshot {
                provider: provider.to_owned(),
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                open_until_ms: None,
                last_failure_ms: None,
                last_success_ms: None,
            },
            |entry| CircuitSnapshot {
                provider: provider.to_owned(),
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                half_open_successes: entry.half_open_successes,
                open_until_ms: entry.open_until.map(instant_to_unix_ms),
                last_failure_ms: entry.last_failure_ms,
                last_success_ms: entry.last_success_ms,
            },
        )
    }

    /// Snapshots for every tracked provider
    pub fn all_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.circuits
            .iter()
            .map(|entry| {
                let provider = entry.key().clone();
                CircuitSnapshot {
                    provider,
                    state: entry.state,
                    consecutive_failures: entry.consecutive_failures,
                    half_open_successes: entry.half_open_successes,
                    open_until_ms: entry.open_until.map(instant_to_unix_ms),
                    last_failure_ms: entry.last_failure_ms,
                    last_success_ms: entry.last_success_ms,
                }
            })
            .collect()
    }

    fn update_open_gauge(&self) {
        let open = self
            .circuits
            .iter()
            .filter(|entry| entry.state == CircuitState::Open)
            .count();
        self.metrics.set_open_circuits(open as i64);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn instant_to_unix_ms(instant: Instant) -> u64 {
    let now = Instant::now();
    if instant > now {
        now_ms() + instant.saturating_duration_since(now).as_millis() as u64
    } else {
        now_ms().saturating_sub(now.saturating_duration_since(instant).as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitConfig {
                failure_threshold,
                success_threshold,
                recovery_timeout_secs: recovery_secs,
            },
            Arc::new(MetricsSink::new()),
        )
    }

    #[test]
    fn opens_after_structural_threshold() {
        let breaker = breaker(5, 2, 30);
        for _ in 0..4 {
            breaker.record_failure("p", true);
            assert_eq!(breaker.state("p"), CircuitState::Closed);
        }
        breaker.record_failure("p", true);
        assert_eq!(breaker.state("p"), CircuitState::Open);
        assert!(matches!(breaker.check("p"), CircuitDecision::Skip { .. }));
    }

    #[test]
    fn transient_burst_does_not_trip() {
        let breaker = breaker(5, 2, 30);
        for _ in 0..20 {
            breaker.record_failure("p", false);
        }
        assert_eq!(breaker.state("p"), CircuitState::Closed);
        assert!(breaker.check("p").is_allowed());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let breaker = breaker(3, 2, 30);
        breaker.record_failure("p", true);
        breaker.record_failure("p", true);
        breaker.record_success("p");
        breaker.record_failure("p", true);
        breaker.record_failure("p", true);
        assert_eq!(breaker.state("p"), CircuitState::Closed);
    }

    #[test]
    fn recovery_timeout_half_opens_with_probe_budget() {
        let breaker = breaker(1, 2, 0);
        breaker.record_failure("p", true);
        assert_eq!(breaker.state("p"), CircuitState::Open);

        // recovery_timeout_secs = 0: first check transitions to half-open
        assert_eq!(breaker.check("p"), CircuitDecision::AllowProbe);
        assert_eq!(breaker.state("p"), CircuitState::HalfOpen);

        // One unit of budget left (success_threshold = 2)
        assert_eq!(breaker.check("p"), CircuitDecision::AllowProbe);
        // Budget exhausted
        assert_eq!(breaker.check("p"), CircuitDecision::Skip { retry_in_secs: 0 });
    }

    #[test]
    fn probe_successes_close_the_circuit() {
        let breaker = breaker(1, 2, 0);
        breaker.record_failure("p", true);
        assert_eq!(breaker.check("p"), CircuitDecision::AllowProbe);
        breaker.record_success("p");
        assert_eq!(breaker.state("p"), CircuitState::HalfOpen);
        assert_eq!(breaker.check("p"), CircuitDecision::AllowProbe);
        breaker.record_success("p");
        assert_eq!(breaker.state("p"), CircuitState::Closed);
    }

    #[test]
    fn probe_failure_reopens_immediately() {
        let breaker = breaker(1, 2, 0);
        breaker.record_failure("p", true);
        assert_eq!(breaker.check("p"), CircuitDecision::AllowProbe);
        // Even a transient failure reopens a probing circuit
        breaker.record_failure("p", false);
        assert_eq!(breaker.state("p"), CircuitState::Open);
    }

    #[test]
    fn admin_transitions_ignore_thresholds() {
        let breaker = breaker(5, 2, 30);
        breaker.force_open("p");
        assert_eq!(breaker.state("p"), CircuitState::Open);
        breaker.force_close("p");
        assert_eq!(breaker.state("p"), CircuitState::Closed);
        breaker.force_open("p");
        breaker.reset("p");
        assert_eq!(breaker.state("p"), CircuitState::Closed);
    }

    #[test]
    fn providers_are_independent() {
        let breaker = breaker(1, 2, 30);
        breaker.record_failure("bad", true);
        assert_eq!(breaker.state("bad"), CircuitState::Open);
        assert_eq!(breaker.state("good"), CircuitState::Closed);
        assert!(breaker.check("good").is_allowed());
    }
}
