//! Activity sink seam.
//!
//! The control layer reports every successful mutation (and the warnings of
//! best-effort side effects) into a bounded event sink owned by the caller.
//! The API server plugs its activity ring in here.

use serde::{Deserialize, Serialize};

/// Outcome attached to an activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Warning,
    Error,
}

/// Receiver of control-layer activity events.
pub trait ActivitySink: Send + Sync {
    fn record(&self, action: &str, target: &str, status: ActivityStatus, message: &str);
}

/// Sink that drops everything; used when no ring is attached.
pub struct NoopSink;

impl ActivitySink for NoopSink {
    fn record(&self, _action: &str, _target: &str, _status: ActivityStatus, _message: &str) {}
}
