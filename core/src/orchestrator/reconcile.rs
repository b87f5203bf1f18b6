//! Reconciliation: events that matched no suppression predicate. The
//! HOST is authoritative, so under the mirror policy its structural
//! changes are folded into the registry; under enforce they are reverted
//! with a compensating request.

use super::{ChainState, Orchestrator};
use crate::config::ExternalPolicy;
use crate::dispatcher::EventPump;
use crate::error::RigError;
use crate::notify::Notification;
use crate::plugin::DiscoveredPorts;
use crate::rack::Slot;
use crate::suppress::{Echo, SuppressionScope};
use crate::transport::{HardwarePorts, HostEvent};

impl Orchestrator {
    pub(crate) fn reconcile(
        &mut self,
        event: HostEvent,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) {
        self.state = ChainState::Reconciling;
        match event {
            HostEvent::Add { label, uri, ports } => self.external_add(label, uri, ports, scope),
            HostEvent::Remove { label } => self.external_remove(label, scope, pump),
            HostEvent::Connect { src, dst } => self.note_external_connect(&src, &dst),
            HostEvent::Disconnect { src, dst } => self.note_external_disconnect(&src, &dst),
            HostEvent::ParamSet {
                label,
                symbol,
                value,
            } => self.external_param(label, symbol, value),
            HostEvent::Bypass { label, on } => self.external_bypass(label, on),
            HostEvent::Hardware(ports) => self.external_hardware(ports, scope),
        }
        self.state = ChainState::Idle;
    }

    fn external_add(
        &mut self,
        label: String,
        uri: String,
        ports: DiscoveredPorts,
        scope: &mut SuppressionScope,
    ) {
        if self.rack.get_by_label(&label).is_some() {
            // A duplicate add outside any active edit is a HOST-side
            // contradiction; keep the mirror as it stands
            let err = RigError::InvariantViolation(format!(
                "host re-announced existing label {}",
                label
            ));
            self.report(&err);
            return;
        }
        match self.policy {
            ExternalPolicy::Enforce => {
                log::warn!("reverting external add of {} ({})", label, uri);
                scope.expect(Echo::Remove { label: label.clone() }, self.echo_deadline());
                if let Err(e) = self.transport.remove_plugin(&label) {
                    self.report(&e);
                }
            }
            ExternalPolicy::Mirror => {
                let plugin = match self.catalog.instantiate(&uri, &ports) {
                    Ok(p) => p,
                    Err(_) => self.catalog.foreign(&uri, &ports),
                };
                let slot = Slot::new(label.clone(), Some(plugin));
                let endpoint = slot.endpoint().unwrap_or_default();
                let plan = self.plan_with_insert(self.rack.len(), &endpoint);
                if let Err(e) = self.apply_transition(plan, scope) {
                    // Mirror it anyway; the slot exists on the HOST even
                    // if we could not wire it in
                    self.report(&e);
                }
                self.rack.insert(None, slot);
                if self.check_and_publish().is_ok() {
                    if let Some(snapshot) = self.rack.snapshot().by_label(&label).cloned() {
                        self.notify(Notification::SlotAdded(snapshot));
                    }
                }
                log::info!("mirrored external add of {} ({})", label, uri);
            }
        }
    }

    fn external_remove(
        &mut self,
        label: String,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) {
        let Some(slot) = self.rack.remove_by_label(&label) else {
            log::warn!("host removed unknown label {}; ignoring", label);
            return;
        };
        // The instance and its edges are already gone on the HOST. Close
        // the hole: connect around it first, stale disconnects are
        // best-effort no-ops over there.
        if let Err(e) = self.apply_transition(self.current_plan(), scope) {
            self.report(&e);
        }
        let _ = self.check_and_publish();
        self.notify(Notification::SlotRemoved {
            label: label.clone(),
        });

        if self.policy == ExternalPolicy::Enforce {
            let uri = slot.plugin.as_ref().map(|p| p.uri.clone());
            match uri {
                Some(uri) => {
                    log::warn!(
                        "re-adding {} at {} after external remove; control values are lost",
                        uri,
                        slot.index
                    );
                    if let Err(e) = self.do_add(&uri, Some(slot.index), scope, pump) {
                        self.report(&e);
                    }
                }
                None => log::warn!("cannot re-add emptied slot {}", label),
            }
        }
    }

    fn external_param(&mut self, label: String, symbol: String, value: f32) {
        let Some(plugin) = self
            .rack
            .get_mut_by_label(&label)
            .and_then(|s| s.plugin.as_mut())
        else {
            log::warn!("param_set for unknown label {}", label);
            return;
        };
        plugin.controls.insert(symbol.clone(), value);
        self.publish();
        self.notify(Notification::ParamChanged {
            label,
            symbol,
            value,
        });
    }

    fn external_bypass(&mut self, label: String, on: bool) {
        let Some(plugin) = self
            .rack
            .get_mut_by_label(&label)
            .and_then(|s| s.plugin.as_mut())
        else {
            log::warn!("bypass for unknown label {}", label);
            return;
        };
        plugin.bypassed = on;
        self.publish();
        self.notify(Notification::BypassChanged { label, on });
    }

    /// The HOST replaced its hardware port set: refresh the terminals
    /// and run a reconnection pass, new edges before old.
    fn external_hardware(&mut self, ports: HardwarePorts, scope: &mut SuppressionScope) {
        self.adopt_hardware(&ports);
        if let Err(e) = self.apply_transition(self.current_plan(), scope) {
            self.report(&e);
        }
        self.publish();
        self.notify(Notification::HardwareChanged(ports));
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use crate::config::ExternalPolicy;
    use crate::dispatcher::EventPump;
    use crate::notify::Notification;
    use crate::transport::{HardwarePorts, HostEvent};
    use std::collections::VecDeque;

    fn external_add_event(label: &str, uri: &str) -> HostEvent {
        HostEvent::Add {
            label: label.to_string(),
            uri: uri.to_string(),
            ports: mono_ports(),
        }
    }

    #[test]
    fn mirror_accepts_external_add() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        f.trace.lock().unwrap().clear();

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            external_add_event("ExtPlug_0", "urn:pedal:mverb"),
            &mut f.scope,
            &mut pump,
        );

        assert_eq!(f.orchestrator.rack.labels(), vec!["ExtPlug_0"]);
        // Insert primitive between the terminals, connects first
        assert_eq!(
            f.trace.lock().unwrap().as_slice(),
            &[
                "connect capture_1 ExtPlug_0/in",
                "connect ExtPlug_0/out playback_1",
                "disconnect capture_1 playback_1",
            ]
        );
        let added: Vec<_> = f
            .notif_rx
            .try_iter()
            .filter(|n| matches!(n, Notification::SlotAdded(_)))
            .collect();
        assert_eq!(added.len(), 1);
    }

    #[test]
    fn mirror_accepts_foreign_uri() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            external_add_event("Alien_7", "http://example.org/alien#Fuzz"),
            &mut f.scope,
            &mut pump,
        );
        let snapshot = f.orchestrator.rack.snapshot();
        assert_eq!(snapshot.slots[0].name, "Fuzz");
    }

    #[test]
    fn enforce_reverts_external_add() {
        let mut config = config_with_pedals();
        config.rack.external_policy = ExternalPolicy::Enforce;
        let mut f = fixture(config);
        let mut deferred = VecDeque::new();
        f.trace.lock().unwrap().clear();

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            external_add_event("ExtPlug_0", "urn:pedal:mverb"),
            &mut f.scope,
            &mut pump,
        );

        assert!(f.orchestrator.rack.is_empty());
        assert_eq!(
            f.trace.lock().unwrap().as_slice(),
            &["remove ExtPlug_0"]
        );
        // The compensating remove will be echoed; its predicate is armed
        let echo = HostEvent::Remove {
            label: "ExtPlug_0".to_string(),
        };
        assert!(f.scope.absorb(&echo));
    }

    #[test]
    fn external_remove_closes_the_hole() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        for uri in ["urn:pedal:ds1", "urn:pedal:reverb", "urn:pedal:delay"] {
            let mut pump = EventPump::new(&f.event_rx, &mut deferred);
            f.orchestrator
                .request_add(uri, None, &mut f.scope, &mut pump)
                .unwrap();
        }
        f.trace.lock().unwrap().clear();

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            HostEvent::Remove {
                label: "Reverb_1".to_string(),
            },
            &mut f.scope,
            &mut pump,
        );

        assert_eq!(f.orchestrator.rack.labels(), vec!["DS1_0", "Delay_2"]);
        let trace = f.trace.lock().unwrap().clone();
        assert_eq!(trace[0], "connect DS1_0/out Delay_2/in");
    }

    #[test]
    fn external_remove_of_unknown_label_is_ignored() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        f.trace.lock().unwrap().clear();
        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            HostEvent::Remove {
                label: "Ghost_9".to_string(),
            },
            &mut f.scope,
            &mut pump,
        );
        assert!(f.trace.lock().unwrap().is_empty());
        assert!(f.notif_rx.try_iter().count() == 0);
    }

    #[test]
    fn enforce_readds_after_external_remove() {
        let mut config = config_with_pedals();
        config.rack.external_policy = ExternalPolicy::Enforce;
        let mut f = fixture(config);
        let mut deferred = VecDeque::new();
        {
            let mut pump = EventPump::new(&f.event_rx, &mut deferred);
            f.orchestrator
                .request_add("urn:pedal:ds1", None, &mut f.scope, &mut pump)
                .unwrap();
        }
        f.trace.lock().unwrap().clear();

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            HostEvent::Remove {
                label: "DS1_0".to_string(),
            },
            &mut f.scope,
            &mut pump,
        );

        // Compensation re-instantiated the same URI under a fresh label
        assert_eq!(f.orchestrator.rack.labels(), vec!["DS1_1"]);
        assert!(f
            .trace
            .lock()
            .unwrap()
            .contains(&"add urn:pedal:ds1".to_string()));
    }

    #[test]
    fn duplicate_add_outside_edit_is_a_violation() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        {
            let mut pump = EventPump::new(&f.event_rx, &mut deferred);
            f.orchestrator
                .request_add("urn:pedal:ds1", None, &mut f.scope, &mut pump)
                .unwrap();
        }
        while f.notif_rx.try_iter().next().is_some() {}

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            external_add_event("DS1_0", "urn:pedal:ds1"),
            &mut f.scope,
            &mut pump,
        );
        let errors: Vec<_> = f
            .notif_rx
            .try_iter()
            .filter(|n| matches!(n, Notification::Error { kind, .. } if *kind == "invariant_violation"))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(f.orchestrator.rack.labels(), vec!["DS1_0"]);
    }

    #[test]
    fn external_param_and_bypass_update_the_mirror() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        {
            let mut pump = EventPump::new(&f.event_rx, &mut deferred);
            f.orchestrator
                .request_add("urn:pedal:ds1", None, &mut f.scope, &mut pump)
                .unwrap();
        }
        while f.notif_rx.try_iter().next().is_some() {}

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            HostEvent::ParamSet {
                label: "DS1_0".to_string(),
                symbol: "gain".to_string(),
                value: 0.3,
            },
            &mut f.scope,
            &mut pump,
        );
        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            HostEvent::Bypass {
                label: "DS1_0".to_string(),
                on: true,
            },
            &mut f.scope,
            &mut pump,
        );

        let snapshot = f.orchestrator.rack.snapshot();
        assert_eq!(snapshot.slots[0].controls.get("gain"), Some(&0.3));
        assert!(snapshot.slots[0].bypassed);
        let kinds: Vec<_> = f.notif_rx.try_iter().collect();
        assert!(kinds
            .iter()
            .any(|n| matches!(n, Notification::ParamChanged { value, .. } if *value == 0.3)));
        assert!(kinds
            .iter()
            .any(|n| matches!(n, Notification::BypassChanged { on: true, .. })));
    }

    #[test]
    fn hardware_replacement_rewires_terminals() {
        let mut f = fixture(config_with_pedals());
        let mut deferred = VecDeque::new();
        {
            let mut pump = EventPump::new(&f.event_rx, &mut deferred);
            f.orchestrator
                .request_add("urn:pedal:ds1", None, &mut f.scope, &mut pump)
                .unwrap();
        }
        f.trace.lock().unwrap().clear();

        let mut pump = EventPump::new(&f.event_rx, &mut deferred);
        f.orchestrator.reconcile(
            HostEvent::Hardware(HardwarePorts {
                audio_inputs: vec!["system_in".to_string()],
                audio_outputs: vec!["system_out".to_string()],
                midi_inputs: Vec::new(),
                midi_outputs: Vec::new(),
            }),
            &mut f.scope,
            &mut pump,
        );

        let trace = f.trace.lock().unwrap().clone();
        assert_eq!(
            trace,
            vec![
                "connect system_in DS1_0/in",
                "connect DS1_0/out system_out",
                "disconnect capture_1 DS1_0/in",
                "disconnect DS1_0/out playback_1",
            ]
        );
    }
}
