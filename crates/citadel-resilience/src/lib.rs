//! The resilience core: circuit breaking, health monitoring, self-healing
//! and adapter reloads
//!
//! Components are provider-local by construction: no state is shared
//! between providers, so one misbehaving backend can never influence the
//! accounting of another.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod circuit;
pub mod error;
pub mod heal;
pub mod health;
pub mod metrics;
pub mod reload;

pub use circuit::{CircuitBreaker, CircuitDecision, CircuitSnapshot, CircuitState};
pub use error::HealError;
pub use heal::{Citation, FixProposal, HealSettings, HealWorker};
pub use health::{ClassifiedError, HealRequest, HealthMonitor, HealthSettings, ProviderHealthSnapshot};
pub use metrics::MetricsSink;
pub use reload::{
    AdapterFactory, AdapterVersion, FixOutcome, FixStatus, PendingFix, ReloadManager, ReloadSettings, VersionOrigin,
};
