//! Structural suppression: for every outbound request made during a
//! local edit, the expected HOST echo is installed as a predicate. An
//! inbound event matching a predicate is absorbed as a confirmation;
//! everything else falls through to reconciliation. Predicates left
//! unmatched past their deadline are logged and dropped.

use std::time::Instant;

use crate::transport::HostEvent;

/// The echo a single outbound request is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Echo {
    Add { label: String },
    Remove { label: String },
    Connect { src: String, dst: String },
    Disconnect { src: String, dst: String },
    ParamSet { label: String, symbol: String },
    Bypass { label: String },
}

impl Echo {
    fn matches(&self, event: &HostEvent) -> bool {
        match (self, event) {
            (Echo::Add { label }, HostEvent::Add { label: l, .. }) => label == l,
            (Echo::Remove { label }, HostEvent::Remove { label: l }) => label == l,
            (Echo::Connect { src, dst }, HostEvent::Connect { src: s, dst: d }) => {
                src == s && dst == d
            }
            (Echo::Disconnect { src, dst }, HostEvent::Disconnect { src: s, dst: d }) => {
                src == s && dst == d
            }
            (Echo::ParamSet { label, symbol }, HostEvent::ParamSet { label: l, symbol: s, .. }) => {
                label == l && symbol == s
            }
            (Echo::Bypass { label }, HostEvent::Bypass { label: l, .. }) => label == l,
            _ => false,
        }
    }
}

/// The dispatcher-owned predicate set. Reads from the orchestrator are
/// immediate (same thread); no locking.
#[derive(Debug, Default)]
pub struct SuppressionScope {
    pending: Vec<(Echo, Instant)>,
}

impl SuppressionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, echo: Echo, deadline: Instant) {
        self.pending.push((echo, deadline));
    }

    /// Absorb `event` if a predicate matches. Consumes exactly one
    /// predicate, so a duplicated echo is only confirmed once.
    pub fn absorb(&mut self, event: &HostEvent) -> bool {
        if let Some(at) = self.pending.iter().position(|(e, _)| e.matches(event)) {
            self.pending.remove(at);
            true
        } else {
            false
        }
    }

    /// True when an add echo for `label` is still expected. Used to tell
    /// a confirming duplicate `add` apart from an invariant violation.
    pub fn expects_add(&self, label: &str) -> bool {
        self.pending
            .iter()
            .any(|(e, _)| matches!(e, Echo::Add { label: l } if l == label))
    }

    /// Drop predicates past their deadline, logging each. Returns how
    /// many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(echo, deadline)| {
            if *deadline <= now {
                log::warn!("host never echoed {:?}", echo);
                false
            } else {
                true
            }
        });
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
