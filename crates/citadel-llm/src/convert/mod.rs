//! Conversion between SCRI and provider wire formats
//!
//! Each module carries the full mapping for one family: role map,
//! content-type map, finish-reason map, usage-field map, and the
//! tool-definition shape. Conversions are pure; the adapters do the I/O.
//!
//! A provider field the mapping cannot place is handled one of two ways:
//! a load-bearing gap (no output content, undecodable tool arguments)
//! raises an [`AdapterError`](crate::error::AdapterError) with a
//! structural kind, while a cosmetic gap produces a valid SCRI value plus
//! a [`DriftNote`] the adapter forwards to the health monitor.

pub mod anthropic;
pub mod google;
pub mod openai;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ErrorKind;

/// A non-fatal mapping gap observed during conversion
#[derive(Debug, Clone)]
pub struct DriftNote {
    /// Structural kind the gap would escalate to
    pub kind: ErrorKind,
    /// What could not be mapped
    pub message: String,
}

impl DriftNote {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Unix milliseconds now
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Generate a unique id with the given prefix
///
/// Time plus a process-wide counter; collision-free within a process,
/// unique enough across restarts.
pub(crate) fn simple_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{:x}{count:04x}", now_ms())
}
