//! The dispatcher thread: one logical timeline for user intents and
//! HOST events. Intents carry reply channels and are processed one at a
//! time; events are drained eagerly in HOST order. While an edit is in
//! flight its echoes are absorbed through the suppression scope and
//! everything else is deferred for reconciliation afterwards.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RigConfig;
use crate::error::RigError;
use crate::notify::Notification;
use crate::orchestrator::Orchestrator;
use crate::plugin::DiscoveredPorts;
use crate::preset::PresetEntry;
use crate::rack::RackSnapshot;
use crate::suppress::SuppressionScope;
use crate::transport::{HostEvent, HostTransport};

/// User intents, queued FIFO behind whatever edit is running.
pub(crate) enum Intent {
    Add {
        uri: String,
        position: Option<usize>,
        reply: Sender<Result<String, RigError>>,
    },
    Remove {
        label: String,
        reply: Sender<Result<(), RigError>>,
    },
    Replace {
        label: String,
        uri: String,
        reply: Sender<Result<String, RigError>>,
    },
    Move {
        from: usize,
        to: usize,
        reply: Sender<Result<(), RigError>>,
    },
    Clear {
        reply: Sender<Result<(), RigError>>,
    },
    SetParam {
        label: String,
        symbol: String,
        value: f32,
        reply: Sender<Result<(), RigError>>,
    },
    SetBypass {
        label: String,
        on: bool,
        reply: Sender<Result<(), RigError>>,
    },
    LoadPreset {
        entries: Vec<PresetEntry>,
        reply: Sender<Result<(), RigError>>,
    },
    Shutdown,
}

enum ControlAction {
    Param { symbol: String, value: f32 },
    Bypass { on: bool },
}

/// A control intent for a label that is not in the registry yet. Held
/// until the slot appears or the deadline passes.
struct ParkedControl {
    label: String,
    action: ControlAction,
    reply: Sender<Result<(), RigError>>,
    deadline: Instant,
}

/// Pulls events off the feed while an edit is blocked on an echo.
/// Matches are absorbed; everything else is deferred in arrival order.
pub(crate) struct EventPump<'a> {
    rx: &'a Receiver<HostEvent>,
    deferred: &'a mut VecDeque<HostEvent>,
}

impl<'a> EventPump<'a> {
    pub(crate) fn new(rx: &'a Receiver<HostEvent>, deferred: &'a mut VecDeque<HostEvent>) -> Self {
        Self { rx, deferred }
    }

    /// Wait for the add echo carrying `label`'s port lists. `None` on
    /// timeout; the predicate stays in the scope for a late absorb.
    pub(crate) fn wait_for_add(
        &mut self,
        label: &str,
        scope: &mut SuppressionScope,
        timeout: Duration,
    ) -> Option<DiscoveredPorts> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    if let HostEvent::Add {
                        label: l, ports, ..
                    } = &event
                    {
                        if l == label {
                            let ports = ports.clone();
                            scope.absorb(&event);
                            return Some(ports);
                        }
                    }
                    if !scope.absorb(&event) {
                        self.deferred.push_back(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    /// Wait for the remove echo of `label`. False on timeout.
    pub(crate) fn wait_for_remove(
        &mut self,
        label: &str,
        scope: &mut SuppressionScope,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    let matched =
                        matches!(&event, HostEvent::Remove { label: l } if l == label);
                    if !scope.absorb(&event) {
                        self.deferred.push_back(event);
                    } else if matched {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            }
        }
    }

    /// Pump until the scope has no pending echoes or the grace period
    /// runs out. Used when a bulk edit commits.
    pub(crate) fn absorb_remaining(&mut self, scope: &mut SuppressionScope, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !scope.is_empty() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    if !scope.absorb(&event) {
                        self.deferred.push_back(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

pub(crate) struct Dispatcher {
    intent_rx: Receiver<Intent>,
    event_rx: Receiver<HostEvent>,
    deferred: VecDeque<HostEvent>,
    scope: SuppressionScope,
    orchestrator: Orchestrator,
    parked: Vec<ParkedControl>,
    timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        config: &RigConfig,
        transport: Box<dyn HostTransport>,
        intent_rx: Receiver<Intent>,
        event_rx: Receiver<HostEvent>,
        notifications: Sender<Notification>,
        monitor: Arc<RwLock<RackSnapshot>>,
    ) -> Self {
        Self {
            intent_rx,
            event_rx,
            deferred: VecDeque::new(),
            scope: SuppressionScope::new(),
            orchestrator: Orchestrator::new(config, transport, notifications, monitor),
            parked: Vec::new(),
            timeout: Duration::from_millis(config.server.timeout_ms),
        }
    }

    pub(crate) fn run(mut self) {
        self.orchestrator.startup(&mut self.scope);
        loop {
            while let Some(event) = self.deferred.pop_front() {
                self.route_event(event);
            }
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.route_event(event);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                // Feed gone; keep serving intents until shutdown
                Err(TryRecvError::Disconnected) => {}
            }
            match self.intent_rx.try_recv() {
                Ok(Intent::Shutdown) => break,
                Ok(intent) => self.handle_intent(intent),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }
            self.flush_parked();
            self.scope.purge_expired(Instant::now());
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Invariant: an event is either absorbed as a confirmation or
    /// reacted to by reconciliation, never both, never neither.
    fn route_event(&mut self, event: HostEvent) {
        let Self {
            ref event_rx,
            ref mut deferred,
            ref mut scope,
            ref mut orchestrator,
            ..
        } = *self;
        if scope.absorb(&event) {
            orchestrator.confirm(&event, scope);
        } else {
            let mut pump = EventPump::new(event_rx, deferred);
            orchestrator.reconcile(event, scope, &mut pump);
        }
        self.flush_parked();
    }

    fn handle_intent(&mut self, intent: Intent) {
        let Self {
            ref event_rx,
            ref mut deferred,
            ref mut scope,
            ref mut orchestrator,
            ref mut parked,
            timeout,
            ..
        } = *self;
        let mut pump = EventPump::new(event_rx, deferred);
        match intent {
            Intent::Add {
                uri,
                position,
                reply,
            } => {
                let _ = reply.send(orchestrator.request_add(&uri, position, scope, &mut pump));
            }
            Intent::Remove { label, reply } => {
                let _ = reply.send(orchestrator.request_remove(&label, scope, &mut pump));
            }
            Intent::Replace { label, uri, reply } => {
                let _ = reply.send(orchestrator.request_replace(&label, &uri, scope, &mut pump));
            }
            Intent::Move { from, to, reply } => {
                let _ = reply.send(orchestrator.request_move(from, to, scope));
            }
            Intent::Clear { reply } => {
                let _ = reply.send(orchestrator.request_clear(scope, &mut pump));
            }
            Intent::SetParam {
                label,
                symbol,
                value,
                reply,
            } => {
                if orchestrator.has_label(&label) {
                    let _ = reply.send(orchestrator.set_param(&label, &symbol, value, scope));
                } else {
                    parked.push(ParkedControl {
                        label,
                        action: ControlAction::Param { symbol, value },
                        reply,
                        deadline: Instant::now() + timeout,
                    });
                }
            }
            Intent::SetBypass { label, on, reply } => {
                if orchestrator.has_label(&label) {
                    let _ = reply.send(orchestrator.set_bypass(&label, on, scope));
                } else {
                    parked.push(ParkedControl {
                        label,
                        action: ControlAction::Bypass { on },
                        reply,
                        deadline: Instant::now() + timeout,
                    });
                }
            }
            Intent::LoadPreset { entries, reply } => {
                let _ = reply.send(orchestrator.load_preset(&entries, scope, &mut pump));
            }
            Intent::Shutdown => {}
        }
    }

    /// Control intents for labels the registry has since learned, plus
    /// expiry of the ones it never did.
    fn flush_parked(&mut self) {
        if self.parked.is_empty() {
            return;
        }
        let now = Instant::now();
        let parked = std::mem::take(&mut self.parked);
        for item in parked {
            if self.orchestrator.has_label(&item.label) {
                let result = match item.action {
                    ControlAction::Param { ref symbol, value } => {
                        self.orchestrator
                            .set_param(&item.label, symbol, value, &mut self.scope)
                    }
                    ControlAction::Bypass { on } => {
                        self.orchestrator
                            .set_bypass(&item.label, on, &mut self.scope)
                    }
                };
                let _ = item.reply.send(result);
            } else if now >= item.deadline {
                let _ = item
                    .reply
                    .send(Err(RigError::Timeout(format!("slot {}", item.label))));
            } else {
                self.parked.push(item);
            }
        }
    }
}
