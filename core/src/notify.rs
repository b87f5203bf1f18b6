//! Notifications emitted by the dispatcher thread and drained by the
//! embedding UI or script each frame.

use crate::rack::SlotSnapshot;
use crate::transport::HardwarePorts;

/// Feedback sent from the dispatcher thread back to the handle.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A slot appeared in the registry (local intent or external add)
    SlotAdded(SlotSnapshot),
    /// A slot left the registry
    SlotRemoved { label: String },
    /// A control value changed from outside
    ParamChanged {
        label: String,
        symbol: String,
        value: f32,
    },
    /// Bypass state changed from outside
    BypassChanged { label: String, on: bool },
    /// The HOST replaced its hardware port set
    HardwareChanged(HardwarePorts),
    /// An asynchronous failure (reconciliation, enforce compensation,
    /// late echo handling). Intent-level failures are returned to the
    /// caller instead.
    Error { kind: &'static str, detail: String },
}
