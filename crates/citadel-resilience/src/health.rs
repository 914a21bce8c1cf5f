//! Provider health monitor
//!
//! Keeps a sliding window of classified errors per provider and
//! dispatches a heal request when structural errors cross the threshold.
//! Dispatch is gated four ways: threshold crossed, provider not in
//! cooldown, healing globally enabled, provider not paused. Observer
//! callbacks are notified of every error but can never influence
//! dispatch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::mpsc;

use citadel_llm::error::{ErrorKind, signature_of};

use crate::metrics::MetricsSink;

/// One classified error occurrence
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub provider: String,
    pub model: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Unix milliseconds
    pub at_ms: u64,
    /// Stable dedup signature (provider + kind + normalized message)
    pub signature: String,
}

/// Dispatched to the heal worker when a provider crosses the threshold
#[derive(Debug, Clone)]
pub struct HealRequest {
    pub provider: String,
    /// Most recent errors, newest last
    pub recent_errors: Vec<ClassifiedError>,
    /// Adapter version the errors were observed under
    pub adapter_version: u64,
}

/// Observer invoked on every recorded error; must not block
pub type HealthObserver = Arc<dyn Fn(&ClassifiedError) + Send + Sync>;

/// Monitor tuning
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub error_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
    pub max_history: usize,
    /// Errors attached to a heal request
    pub max_recent: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            window: Duration::from_secs(300),
            cooldown: Duration::from_secs(600),
            max_history: 100,
            max_recent: 3,
        }
    }
}

#[derive(Debug, Default)]
struct ProviderEntry {
    history: VecDeque<(Instant, ClassifiedError)>,
    consecutive_failures: u32,
    last_success_ms: Option<u64>,
    last_failure_ms: Option<u64>,
    cooldown_until: Option<Instant>,
    healing: bool,
}

/// Serializable health view for one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthSnapshot {
    pub provider: String,
    /// Structural errors within the window
    pub recent_structural_errors: u32,
    /// All errors within the window, bucketed by kind
    pub recent_errors_by_kind: std::collections::BTreeMap<String, u32>,
    pub consecutive_failures: u32,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    /// Unix milliseconds until which heal dispatch is suppressed
    pub cooldown_until_ms: Option<u64>,
    pub healing_in_progress: bool,
    pub paused: bool,
}

/// Tracks provider errors and fires heal dispatches
pub struct HealthMonitor {
    entries: DashMap<String, ProviderEntry>,
    settings: HealthSettings,
    enabled: AtomicBool,
    paused: DashSet<String>,
    heal_tx: mpsc::Sender<HealRequest>,
    observers: std::sync::RwLock<Vec<HealthObserver>>,
    metrics: Arc<MetricsSink>,
}

impl HealthMonitor {
    /// Create the monitor and the channel the heal worker consumes
    pub fn new(
        settings: HealthSettings,
        enabled: bool,
        metrics: Arc<MetricsSink>,
    ) -> (Arc<Self>, mpsc::Receiver<HealRequest>) {
        let (heal_tx, heal_rx) = mpsc::channel(16);
        let monitor = Arc::new(Self {
            entries: DashMap::new(),
            settings,
            enabled: AtomicBool::new(enabled),
            paused: DashSet::new(),
            heal_tx,
            observers: std::sync::RwLock::new(Vec::new()),
            metrics,
        });
        (monitor, heal_rx)
    }

    /// Register a non-blocking observer callback
    pub fn add_observer(&self, observer: HealthObserver) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Record a successful call
    pub fn record_success(&self, provider: &str) {
        let mut entry = self.entries.entry(provider.to_owned()).or_default();
        entry.consecutive_failures = 0;
        entry.last_success_ms = Some(now_ms());
    }

    /// Record a classified error; returns true when a heal request was
    /// dispatched
    ///
    /// `hard` distinguishes request failures from soft drift signals:
    /// both land in the window, only hard failures bump the consecutive
    /// counter.
    pub fn record_error(
        &self,
        provider: &str,
        model: &str,
        kind: ErrorKind,
        message: &str,
        adapter_version: u64,
        hard: bool,
    ) -> bool {
        self.metrics.record_provider_error(provider, kind.as_str());

        let error = ClassifiedError {
            provider: provider.to_owned(),
            model: model.to_owned(),
            kind,
            message: message.to_owned(),
            at_ms: now_ms(),
            signature: signature_of(provider, kind, message),
        };

        let dispatch = {
            let mut entry = self.entries.entry(provider.to_owned()).or_default();
            if hard {
                entry.consecutive_failures += 1;
                entry.last_failure_ms = Some(error.at_ms);
            }

            let now = Instant::now();
            entry.history.push_back((now, error.clone()));
            while entry.history.len() > self.settings.max_history {
                entry.history.pop_front();
            }

            self.should_dispatch(provider, &mut entry, now)
        };

        self.notify_observers(&error);

        if dispatch {
            self.dispatch(provider, adapter_version);
        }
        dispatch
    }

    /// The four-way heal gate, evaluated under the provider's entry lock
    fn should_dispatch(&self, provider: &str, entry: &mut ProviderEntry, now: Instant) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }
        if self.paused.contains(provider) {
            return false;
        }
        if entry.healing {
            return false;
        }
        if entry.cooldown_until.is_some_and(|until| now < until) {
            return false;
        }

        let window_start = now.checked_sub(self.settings.window).unwrap_or(now);
        let structural = entry
            .history
            .iter()
            .filter(|(at, e)| *at >= window_start && e.kind.is_structural())
            .count() as u32;

        if structural < self.settings.error_threshold {
            return false;
        }

        // Claim the dispatch while still holding the lock
        entry.healing = true;
        entry.cooldown_until = Some(now + self.settings.cooldown);
        true
    }

    fn dispatch(&self, provider: &str, adapter_version: u64) {
        let recent_errors = self.entries.get(provider).map_or_else(Vec::new, |entry| {
            entry
                .history
                .iter()
                .rev()
                .take(self.settings.max_recent)
                .map(|(_, e)| e.clone())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect()
        });

        let kind = recent_errors
            .last()
            .map_or("unknown", |e| e.kind.as_str());
        self.metrics.record_heal_request(provider, kind);

        let request = HealRequest {
            provider: provider.to_owned(),
            recent_errors,
            adapter_version,
        };

        tracing::warn!(provider, adapter_version, "structural error threshold crossed, dispatching heal request");

        if let Err(e) = self.heal_tx.try_send(request) {
            tracing::error!(provider, error = %e, "heal channel full or closed, dropping request");
            if let Some(mut entry) = self.entries.get_mut(provider) {
                entry.healing = false;
            }
        }
    }

    fn notify_observers(&self, error: &ClassifiedError) {
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer(error);
            }
        }
    }

    /// Heal cycle finished; on success the error window is cleared
    pub fn heal_complete(&self, provider: &str, success: bool) {
        let mut entry = self.entries.entry(provider.to_owned()).or_default();
        entry.healing = false;
        if success {
            entry.history.clear();
            entry.consecutive_failures = 0;
        }
    }

    /// Diagnosis declared the window noise: clear it, keep the cooldown
    pub fn decay_window(&self, provider: &str) {
        let mut entry = self.entries.entry(provider.to_owned()).or_default();
        entry.history.clear();
        entry.healing = false;
    }

    /// Pause heal dispatch for a provider
    pub fn pause(&self, provider: &str) {
        self.paused.insert(provider.to_owned());
    }

    /// Resume heal dispatch for a provider
    pub fn resume(&self, provider: &str) {
        self.paused.remove(provider);
    }

    pub fn is_paused(&self, provider: &str) -> bool {
        self.paused.contains(provider)
    }

    /// Globally enable or disable healing
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Health snapshot for one provider
    pub fn snapshot(&self, provider: &str) -> ProviderHealthSnapshot {
        let paused = self.is_paused(provider);
        self.entries.get(provider).map_or_else(
            || ProviderHealthSnapshot {
                provider: provider.to_owned(),
                recent_structural_errors: 0,
                recent_errors_by_kind: Default::default(),
                consecutive_failures: 0,
                last_success_ms: None,
                last_failure_ms: None,
                cooldown_until_ms: None,
                healing_in_progress: false,
                paused,
            },
            |entry| {
                let window_start = Instant::now().checked_sub(self.settings.window);
                let in_window = |at: &Instant| window_start.is_none_or(|start| *at >= start);

                let mut by_kind = std::collections::BTreeMap::new();
                let mut structural = 0u32;
                for (at, error) in &entry.history {
                    if in_window(at) {
                        *by_kind.entry(error.kind.as_str().to_owned()).or_insert(0u32) += 1;
                        if error.kind.is_structural() {
                            structural += 1;
                        }
                    }
                }

                ProviderHealthSnapshot {
                    provider: provider.to_owned(),
                    recent_structural_errors: structural,
                    recent_errors_by_kind: by_kind,
                    consecutive_failures: entry.consecutive_failures,
                    last_success_ms: entry.last_success_ms,
                    last_failure_ms: entry.last_failure_ms,
                    cooldown_until_ms: entry.cooldown_until.map(|until| {
                        now_ms() + until.saturating_duration_since(Instant::now()).as_millis() as u64
                    }),
                    healing_in_progress: entry.healing,
                    paused,
                }
            },
        )
    }

    /// Snapshots for every provider seen so far
    pub fn all_snapshots(&self) -> Vec<ProviderHealthSnapshot> {
        self.entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>()
            .into_iter()
            .map(|provider| self.snapshot(&provider))
            .collect()
    }
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

    fn monitor(threshold: u32) -> (Arc<HealthMonitor>, mpsc::Receiver<HealRequest>) {
        HealthMonitor::new(
            HealthSettings {
                error_threshold: threshold,
                window: Duration::from_secs(300),
                cooldown: Duration::from_secs(600),
                max_history: 100,
                max_recent: 3,
            },
            true,
            Arc::new(MetricsSink::new()),
        )
    }

    #[test]
    fn below_threshold_never_dispatches() {
        let (monitor, mut rx) = monitor(3);
        assert!(!monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "bad shape", 1, true));
        assert!(!monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "bad shape", 1, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn crossing_threshold_dispatches_exactly_once() {
        let (monitor, mut rx) = monitor(3);
        monitor.record_error("p", "m", ErrorKind::UnknownField, "field", 1, true);
        monitor.record_error("p", "m", ErrorKind::UnknownField, "field", 1, true);
        assert!(monitor.record_error("p", "m", ErrorKind::UnknownField, "field", 1, true));

        let request = rx.try_recv().unwrap();
        assert_eq!(request.provider, "p");
        assert_eq!(request.recent_errors.len(), 3);
        assert_eq!(request.adapter_version, 1);

        // Further errors during cooldown / in-flight heal dispatch nothing
        assert!(!monitor.record_error("p", "m", ErrorKind::UnknownField, "field", 1, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transient_errors_do_not_count_toward_threshold() {
        let (monitor, mut rx) = monitor(2);
        for _ in 0..10 {
            assert!(!monitor.record_error("p", "m", ErrorKind::Transient, "429", 1, true));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_monitor_never_dispatches() {
        let (monitor, mut rx) = monitor(1);
        monitor.set_enabled(false);
        assert!(!monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "x", 1, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn paused_provider_does_not_dispatch() {
        let (monitor, mut rx) = monitor(1);
        monitor.pause("p");
        assert!(!monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "x", 1, true));
        assert!(rx.try_recv().is_err());
        assert!(!monitor.snapshot("p").healing_in_progress);

        // Resuming lets the still-populated window dispatch on the next error
        monitor.resume("p");
        assert!(monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "x", 1, true));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (monitor, _rx) = monitor(10);
        monitor.record_error("p", "m", ErrorKind::Transient, "x", 1, true);
        monitor.record_error("p", "m", ErrorKind::Transient, "x", 1, true);
        assert_eq!(monitor.snapshot("p").consecutive_failures, 2);
        monitor.record_success("p");
        assert_eq!(monitor.snapshot("p").consecutive_failures, 0);
    }

    #[test]
    fn soft_drift_counts_toward_window_not_consecutive() {
        let (monitor, mut rx) = monitor(2);
        monitor.record_error("p", "m", ErrorKind::UnknownField, "drift", 1, false);
        assert_eq!(monitor.snapshot("p").consecutive_failures, 0);
        assert!(monitor.record_error("p", "m", ErrorKind::UnknownField, "drift", 1, false));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn heal_complete_success_clears_window() {
        let (monitor, _rx) = monitor(2);
        monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "x", 1, true);
        monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "x", 1, true);
        monitor.heal_complete("p", true);
        let snapshot = monitor.snapshot("p");
        assert_eq!(snapshot.recent_structural_errors, 0);
        assert!(!snapshot.healing_in_progress);
    }

    #[test]
    fn observers_see_every_error() {
        let (monitor, _rx) = monitor(100);
        let seen = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);
        monitor.add_observer(Arc::new(move |_| {
            seen_clone.fetch_add(1, Ordering::Relaxed);
        }));
        monitor.record_error("p", "m", ErrorKind::Transient, "x", 1, true);
        monitor.record_error("p", "m", ErrorKind::SchemaMismatch, "y", 1, true);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
