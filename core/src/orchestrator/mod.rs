//! The orchestrator: single mutator of the slot registry. Accepts user
//! intents, issues transport requests, absorbs the HOST's echoes through
//! the suppression scope, and reconciles everything else. All structural
//! edits go through the make-before-break plan transition in `intents`.

mod intents;
mod reconcile;

use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::config::{ExternalPolicy, HardwareConfig, RigConfig};
use crate::error::RigError;
use crate::notify::Notification;
use crate::plugin::PluginCatalog;
use crate::rack::{Rack, RackSnapshot, Slot, Terminal, TerminalKind};
use crate::routing::{self, Connection, Endpoint, RoutingMode};
use crate::suppress::SuppressionScope;
use crate::transport::{HardwarePorts, HostEvent, HostTransport};

/// Where the chain stands with respect to structural edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No edit in flight; connections reflect the effective chain
    Idle,
    /// A local structural edit is running; echoes are absorbed
    Editing(EditKind),
    /// Mirroring an external change
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Add,
    Remove,
    Replace,
    Move,
    Clear,
    Preset,
}

pub(crate) struct Orchestrator {
    transport: Box<dyn HostTransport>,
    catalog: PluginCatalog,
    rack: Rack,
    input_terminal: Terminal,
    output_terminal: Terminal,
    mode: RoutingMode,
    policy: ExternalPolicy,
    slots_limit: Option<usize>,
    hardware_config: HardwareConfig,
    /// Edges this client has commanded, in issue order. Never the full
    /// HOST connection set.
    commanded: Vec<Connection>,
    state: ChainState,
    timeout: Duration,
    notifications: Sender<Notification>,
    monitor: Arc<RwLock<RackSnapshot>>,
}

impl Orchestrator {
    pub(crate) fn new(
        config: &RigConfig,
        transport: Box<dyn HostTransport>,
        notifications: Sender<Notification>,
        monitor: Arc<RwLock<RackSnapshot>>,
    ) -> Self {
        Self {
            transport,
            catalog: PluginCatalog::new(config.plugins.clone()),
            rack: Rack::new(),
            input_terminal: Terminal::new(TerminalKind::Input),
            output_terminal: Terminal::new(TerminalKind::Output),
            mode: config.rack.routing_mode,
            policy: config.rack.external_policy,
            slots_limit: config.rack.slots_limit,
            hardware_config: config.hardware.clone(),
            commanded: Vec::new(),
            state: ChainState::Idle,
            timeout: Duration::from_millis(config.server.timeout_ms),
            notifications,
            monitor,
        }
    }

    /// Discover hardware ports and converge on the empty chain: the
    /// terminals are connected directly until slots arrive.
    pub(crate) fn startup(&mut self, scope: &mut SuppressionScope) {
        match self.transport.list_hardware_ports() {
            Ok(ports) => self.adopt_hardware(&ports),
            Err(e) => {
                log::warn!("hardware discovery failed: {}", e);
                self.adopt_hardware(&HardwarePorts::default());
            }
        }
        if let Err(e) = self.apply_transition(self.current_plan(), scope) {
            self.report(&e);
        }
        self.publish();
    }

    /// Config arrays replace discovery verbatim; join hints always come
    /// from the config.
    pub(crate) fn adopt_hardware(&mut self, ports: &HardwarePorts) {
        self.input_terminal.audio = self
            .hardware_config
            .inputs
            .clone()
            .unwrap_or_else(|| ports.audio_inputs.clone());
        self.input_terminal.midi = ports.midi_inputs.clone();
        self.input_terminal.join_audio = self.hardware_config.join_audio_inputs;
        self.output_terminal.audio = self
            .hardware_config
            .outputs
            .clone()
            .unwrap_or_else(|| ports.audio_outputs.clone());
        self.output_terminal.midi = ports.midi_outputs.clone();
        self.output_terminal.join_audio = self.hardware_config.join_audio_outputs;
    }

    pub(crate) fn state(&self) -> ChainState {
        self.state
    }

    pub(crate) fn has_label(&self, label: &str) -> bool {
        self.rack.get_by_label(label).is_some()
    }

    /// An absorbed event, delivered back as a confirmation. Only late
    /// add echoes need work: a slot created after an echo timeout has no
    /// HOST-reported ports yet.
    pub(crate) fn confirm(&mut self, event: &HostEvent, scope: &mut SuppressionScope) {
        if let HostEvent::Add { label, ports, .. } = event {
            let adopted = match self.rack.get_mut_by_label(label) {
                Some(slot) => match slot.plugin.as_mut() {
                    Some(plugin) if plugin.has_no_ports() && !ports.is_empty() => {
                        plugin.adopt_discovered(ports);
                        true
                    }
                    _ => false,
                },
                None => false,
            };
            if adopted {
                log::info!("late add echo for {}: adopting ports and rewiring", label);
                if let Err(e) = self.apply_transition(self.current_plan(), scope) {
                    self.report(&e);
                }
                self.publish();
            }
        } else {
            log::debug!("echo confirmed: {:?}", event);
        }
    }

    // ── Plan helpers ──────────────────────────────────────────────

    fn wrap(&self, mid: Vec<Endpoint>) -> Vec<Endpoint> {
        let mut chain = Vec::with_capacity(mid.len() + 2);
        chain.push(self.input_terminal.endpoint());
        chain.extend(mid);
        chain.push(self.output_terminal.endpoint());
        chain
    }

    /// Desired edge set for the chain as it stands.
    pub(crate) fn current_plan(&self) -> Vec<Connection> {
        routing::plan(&self.wrap(self.rack.effective_endpoints()), self.mode)
    }

    /// Desired edge set with `extra` occupying `position`.
    fn plan_with_insert(&self, position: usize, extra: &Endpoint) -> Vec<Connection> {
        let mut mid = Vec::new();
        let mut inserted = false;
        for slot in self.rack.iter() {
            if slot.index == position {
                mid.push(extra.clone());
                inserted = true;
            }
            if let Some(e) = slot.endpoint() {
                mid.push(e);
            }
        }
        if !inserted {
            mid.push(extra.clone());
        }
        routing::plan(&self.wrap(mid), self.mode)
    }

    /// Desired edge set with the labeled slot gone.
    fn plan_without(&self, label: &str) -> Vec<Connection> {
        let mid = self
            .rack
            .iter()
            .filter(|s| s.label != label)
            .filter_map(|s| s.endpoint())
            .collect();
        routing::plan(&self.wrap(mid), self.mode)
    }

    /// Desired edge set with the labeled slot swapped for `new`.
    fn plan_with_replace(&self, label: &str, new: &Endpoint) -> Vec<Connection> {
        let mid = self
            .rack
            .iter()
            .filter_map(|s| {
                if s.label == label {
                    Some(new.clone())
                } else {
                    s.endpoint()
                }
            })
            .collect();
        routing::plan(&self.wrap(mid), self.mode)
    }

    /// Desired edge set after moving the slot at `from` to `to`.
    fn plan_with_move(&self, from: usize, to: usize) -> Vec<Connection> {
        let mut slots: Vec<&Slot> = self.rack.iter().collect();
        let moved = slots.remove(from);
        slots.insert(to.min(slots.len()), moved);
        let mid = slots.iter().filter_map(|s| s.endpoint()).collect();
        routing::plan(&self.wrap(mid), self.mode)
    }

    // ── Bookkeeping ───────────────────────────────────────────────

    pub(crate) fn note_external_connect(&mut self, src: &str, dst: &str) {
        let edge = Connection::new(src, dst);
        if !self.commanded.contains(&edge) {
            self.commanded.push(edge);
        }
    }

    pub(crate) fn note_external_disconnect(&mut self, src: &str, dst: &str) {
        self.commanded.retain(|c| !(c.src == src && c.dst == dst));
    }

    fn echo_deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Bounded wait applied when an edit commits with echoes still due.
    fn grace(&self) -> Duration {
        self.timeout.min(Duration::from_secs(1))
    }

    fn publish(&self) {
        if let Ok(mut snapshot) = self.monitor.write() {
            *snapshot = self.rack.snapshot();
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    fn report(&self, error: &RigError) {
        log::warn!("{}", error);
        self.notify(Notification::Error {
            kind: error.kind(),
            detail: error.to_string(),
        });
    }

    /// Registry invariants are checked after every commit; a violation
    /// is reported and the registry is left as it stands (last known
    /// good mutations only).
    fn check_and_publish(&mut self) -> Result<(), RigError> {
        if let Err(e) = self.rack.check_invariants() {
            self.report(&e);
            return Err(e);
        }
        self.publish();
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn startup_connects_terminals_directly() {
        let f = fixture(config_with_pedals());
        assert_eq!(
            f.trace.lock().unwrap().as_slice(),
            &["hardware", "connect capture_1 playback_1"]
        );
        assert_eq!(
            f.orchestrator.commanded,
            vec![Connection::new("capture_1", "playback_1")]
        );
        assert_eq!(f.orchestrator.state(), ChainState::Idle);
    }

    #[test]
    fn hardware_config_overrides_discovery() {
        let mut config = config_with_pedals();
        config.hardware.inputs = Some(vec!["ext_in_1".to_string(), "ext_in_2".to_string()]);
        config.hardware.join_audio_inputs = true;
        let f = fixture(config);
        assert_eq!(f.orchestrator.input_terminal.audio, vec!["ext_in_1", "ext_in_2"]);
        assert!(f.orchestrator.input_terminal.join_audio);
        // Discovery still supplies the playback side
        assert_eq!(f.orchestrator.output_terminal.audio, vec!["playback_1"]);
    }

    #[test]
    fn external_edge_bookkeeping() {
        let mut f = fixture(config_with_pedals());
        f.orchestrator.note_external_connect("foo/out", "bar/in");
        f.orchestrator.note_external_connect("foo/out", "bar/in");
        assert_eq!(f.orchestrator.commanded.len(), 2);
        f.orchestrator.note_external_disconnect("foo/out", "bar/in");
        assert_eq!(
            f.orchestrator.commanded,
            vec![Connection::new("capture_1", "playback_1")]
        );
    }
}
