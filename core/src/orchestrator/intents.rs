//! Local structural edits. Every one is a plan transition: compute the
//! desired edge set of the edited chain, issue the connects it adds (in
//! plan order), and only after all of them are acknowledged issue the
//! disconnects it drops. A failed connect rolls the new edges back and
//! leaves the old path intact.

use super::{ChainState, EditKind, Orchestrator};
use crate::dispatcher::EventPump;
use crate::error::RigError;
use crate::notify::Notification;
use crate::plugin::DiscoveredPorts;
use crate::rack::Slot;
use crate::routing::{self, Connection};
use crate::suppress::{Echo, SuppressionScope};

impl Orchestrator {
    pub(crate) fn request_add(
        &mut self,
        uri: &str,
        position: Option<usize>,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<String, RigError> {
        if !self.catalog.contains(uri) {
            return Err(RigError::UnsupportedPlugin(uri.to_string()));
        }
        if let Some(limit) = self.slots_limit {
            if self.rack.len() >= limit {
                return Err(RigError::SlotsLimitReached(limit));
            }
        }
        self.state = ChainState::Editing(EditKind::Add);
        let result = self.do_add(uri, position, scope, pump);
        self.state = ChainState::Idle;
        result
    }

    /// The add body, shared with reconciliation's enforce compensation.
    pub(super) fn do_add(
        &mut self,
        uri: &str,
        position: Option<usize>,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<String, RigError> {
        let label = self.transport.add_plugin(uri)?;
        if self.rack.get_by_label(&label).is_some() {
            let err = RigError::DuplicateLabel(label);
            self.report(&err);
            return Err(err);
        }
        scope.expect(Echo::Add { label: label.clone() }, self.echo_deadline());
        let ports = pump
            .wait_for_add(&label, scope, self.timeout)
            .unwrap_or_else(|| {
                log::warn!("no add echo for {} within timeout", label);
                DiscoveredPorts::default()
            });
        let plugin = self.catalog.instantiate(uri, &ports)?;
        let position = position.unwrap_or(self.rack.len()).min(self.rack.len());
        let slot = Slot::new(label.clone(), Some(plugin));
        let endpoint = slot.endpoint().unwrap_or_default();
        let plan = self.plan_with_insert(position, &endpoint);
        if let Err(e) = self.apply_transition(plan, scope) {
            // Old path intact; don't leave the instance orphaned
            scope.expect(Echo::Remove { label: label.clone() }, self.echo_deadline());
            if let Err(e2) = self.transport.remove_plugin(&label) {
                log::warn!("orphan cleanup of {} failed: {}", label, e2);
            }
            return Err(e);
        }
        self.rack.insert(Some(position), slot);
        self.check_and_publish()?;
        if let Some(snapshot) = self.rack.snapshot().by_label(&label).cloned() {
            self.notify(Notification::SlotAdded(snapshot));
        }
        log::info!("added {} as {} at {}", uri, label, position);
        Ok(label)
    }

    pub(crate) fn request_remove(
        &mut self,
        label: &str,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<(), RigError> {
        if self.rack.get_by_label(label).is_none() {
            return Err(RigError::SlotNotFound(label.to_string()));
        }
        self.state = ChainState::Editing(EditKind::Remove);
        let result = self.do_remove(label, scope, pump);
        self.state = ChainState::Idle;
        result
    }

    fn do_remove(
        &mut self,
        label: &str,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<(), RigError> {
        let old_plan = self.commanded.clone();
        let plan = self.plan_without(label);
        self.apply_transition(plan, scope)?;
        scope.expect(Echo::Remove { label: label.to_string() }, self.echo_deadline());
        if let Err(e) = self.transport.remove_plugin(label) {
            // The instance is still alive on the HOST: rewire it back in
            if let Err(e2) = self.apply_transition(old_plan, scope) {
                self.report(&e2);
            }
            return Err(e);
        }
        if !pump.wait_for_remove(label, scope, self.timeout) {
            log::warn!("no remove echo for {} within timeout", label);
        }
        self.rack.remove_by_label(label);
        self.check_and_publish()?;
        self.notify(Notification::SlotRemoved {
            label: label.to_string(),
        });
        log::info!("removed {}", label);
        Ok(())
    }

    /// Composite swap: the registry carries old and new side by side
    /// until the old instance is destroyed, then the new slot takes over
    /// the index.
    pub(crate) fn request_replace(
        &mut self,
        label: &str,
        uri: &str,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<String, RigError> {
        if self.rack.get_by_label(label).is_none() {
            return Err(RigError::SlotNotFound(label.to_string()));
        }
        if !self.catalog.contains(uri) {
            return Err(RigError::UnsupportedPlugin(uri.to_string()));
        }
        self.state = ChainState::Editing(EditKind::Replace);
        let result = self.do_replace(label, uri, scope, pump);
        self.state = ChainState::Idle;
        result
    }

    fn do_replace(
        &mut self,
        label: &str,
        uri: &str,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<String, RigError> {
        let new_label = self.transport.add_plugin(uri)?;
        if self.rack.get_by_label(&new_label).is_some() {
            let err = RigError::DuplicateLabel(new_label);
            self.report(&err);
            return Err(err);
        }
        scope.expect(Echo::Add { label: new_label.clone() }, self.echo_deadline());
        let ports = pump
            .wait_for_add(&new_label, scope, self.timeout)
            .unwrap_or_else(|| {
                log::warn!("no add echo for {} within timeout", new_label);
                DiscoveredPorts::default()
            });
        let plugin = self.catalog.instantiate(uri, &ports)?;
        let new_slot = Slot::new(new_label.clone(), Some(plugin));
        let endpoint = new_slot.endpoint().unwrap_or_default();
        let Some(old_index) = self.rack.get_by_label(label).map(|s| s.index) else {
            return Err(RigError::SlotNotFound(label.to_string()));
        };

        let plan = self.plan_with_replace(label, &endpoint);
        if let Err(e) = self.apply_transition(plan, scope) {
            scope.expect(Echo::Remove { label: new_label.clone() }, self.echo_deadline());
            if let Err(e2) = self.transport.remove_plugin(&new_label) {
                log::warn!("orphan cleanup of {} failed: {}", new_label, e2);
            }
            return Err(e);
        }
        self.rack.insert(Some(old_index + 1), new_slot);
        if let Some(snapshot) = self.rack.snapshot().by_label(&new_label).cloned() {
            self.notify(Notification::SlotAdded(snapshot));
        }

        scope.expect(Echo::Remove { label: label.to_string() }, self.echo_deadline());
        if let Err(e) = self.transport.remove_plugin(label) {
            // Roll forward: the new path is complete, the old instance
            // stays mirrored until the HOST lets go of it
            self.report(&e);
            self.check_and_publish()?;
            return Err(e);
        }
        if !pump.wait_for_remove(label, scope, self.timeout) {
            log::warn!("no remove echo for {} within timeout", label);
        }
        self.rack.remove_by_label(label);
        self.check_and_publish()?;
        self.notify(Notification::SlotRemoved {
            label: label.to_string(),
        });
        log::info!("replaced {} with {} ({})", label, new_label, uri);
        Ok(new_label)
    }

    pub(crate) fn request_move(
        &mut self,
        from: usize,
        to: usize,
        scope: &mut SuppressionScope,
    ) -> Result<(), RigError> {
        if from >= self.rack.len() {
            return Err(RigError::SlotNotFound(format!("index {}", from)));
        }
        if from == to {
            return Ok(());
        }
        self.state = ChainState::Editing(EditKind::Move);
        let result = (|| {
            let plan = self.plan_with_move(from, to);
            self.apply_transition(plan, scope)?;
            self.rack.move_slot(from, to)?;
            self.check_and_publish()
        })();
        self.state = ChainState::Idle;
        result
    }

    pub(crate) fn request_clear(
        &mut self,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<(), RigError> {
        self.state = ChainState::Editing(EditKind::Clear);
        let result = self.do_clear(scope, pump);
        self.state = ChainState::Idle;
        result
    }

    fn do_clear(
        &mut self,
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<(), RigError> {
        // Terminals first; the path may only pass through no plugins
        // once nothing else is left
        let plan = routing::plan(&self.wrap(Vec::new()), self.mode);
        self.apply_transition(plan, scope)?;
        for label in self.rack.labels() {
            scope.expect(Echo::Remove { label: label.clone() }, self.echo_deadline());
            if let Err(e) = self.transport.remove_plugin(&label) {
                self.report(&e);
            }
        }
        pump.absorb_remaining(scope, self.grace());
        for slot in self.rack.clear() {
            self.notify(Notification::SlotRemoved { label: slot.label });
        }
        self.check_and_publish()?;
        log::info!("cleared the chain");
        Ok(())
    }

    // ── Control plane ─────────────────────────────────────────────

    pub(crate) fn set_param(
        &mut self,
        label: &str,
        symbol: &str,
        value: f32,
        scope: &mut SuppressionScope,
    ) -> Result<(), RigError> {
        if self.rack.get_by_label(label).is_none() {
            return Err(RigError::SlotNotFound(label.to_string()));
        }
        self.transport.set_param(label, symbol, value)?;
        scope.expect(
            Echo::ParamSet {
                label: label.to_string(),
                symbol: symbol.to_string(),
            },
            self.echo_deadline(),
        );
        if let Some(plugin) = self
            .rack
            .get_mut_by_label(label)
            .and_then(|s| s.plugin.as_mut())
        {
            plugin.controls.insert(symbol.to_string(), value);
        }
        self.publish();
        Ok(())
    }

    pub(crate) fn set_bypass(
        &mut self,
        label: &str,
        on: bool,
        scope: &mut SuppressionScope,
    ) -> Result<(), RigError> {
        if self.rack.get_by_label(label).is_none() {
            return Err(RigError::SlotNotFound(label.to_string()));
        }
        self.transport.set_bypass(label, on)?;
        scope.expect(Echo::Bypass { label: label.to_string() }, self.echo_deadline());
        if let Some(plugin) = self
            .rack
            .get_mut_by_label(label)
            .and_then(|s| s.plugin.as_mut())
        {
            plugin.bypassed = on;
        }
        self.publish();
        Ok(())
    }

    // ── Presets ───────────────────────────────────────────────────

    /// Clear, then re-create the chain in entry order. One connect pass
    /// at the end; no make-before-break during bulk load.
    pub(crate) fn load_preset(
        &mut self,
        entries: &[crate::preset::PresetEntry],
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<(), RigError> {
        for entry in entries {
            if !self.catalog.contains(&entry.uri) {
                return Err(RigError::UnsupportedPlugin(entry.uri.clone()));
            }
        }
        self.state = ChainState::Editing(EditKind::Preset);
        let result = self.do_load_preset(entries, scope, pump);
        self.state = ChainState::Idle;
        result
    }

    fn do_load_preset(
        &mut self,
        entries: &[crate::preset::PresetEntry],
        scope: &mut SuppressionScope,
        pump: &mut EventPump,
    ) -> Result<(), RigError> {
        self.do_clear(scope, pump)?;
        let mut ordered: Vec<_> = entries.to_vec();
        ordered.sort_by_key(|e| e.index);
        for entry in &ordered {
            let label = self.transport.add_plugin(&entry.uri)?;
            if self.rack.get_by_label(&label).is_some() {
                let err = RigError::DuplicateLabel(label);
                self.report(&err);
                return Err(err);
            }
            scope.expect(Echo::Add { label: label.clone() }, self.echo_deadline());
            let ports = pump
                .wait_for_add(&label, scope, self.timeout)
                .unwrap_or_default();
            let mut plugin = self.catalog.instantiate(&entry.uri, &ports)?;
            for (symbol, value) in &entry.controls {
                if let Err(e) = self.transport.set_param(&label, symbol, *value) {
                    self.report(&e);
                    continue;
                }
                scope.expect(
                    Echo::ParamSet {
                        label: label.clone(),
                        symbol: symbol.clone(),
                    },
                    self.echo_deadline(),
                );
                plugin.controls.insert(symbol.clone(), *value);
            }
            if entry.bypassed {
                match self.transport.set_bypass(&label, true) {
                    Ok(()) => {
                        scope.expect(Echo::Bypass { label: label.clone() }, self.echo_deadline());
                        plugin.bypassed = true;
                    }
                    Err(e) => self.report(&e),
                }
            }
            self.rack.insert(None, Slot::new(label.clone(), Some(plugin)));
            if let Some(snapshot) = self.rack.snapshot().by_label(&label).cloned() {
                self.notify(Notification::SlotAdded(snapshot));
            }
        }
        let plan = self.current_plan();
        self.apply_transition(plan, scope)?;
        pump.absorb_remaining(scope, self.grace());
        self.check_and_publish()?;
        log::info!("loaded preset with {} entries", ordered.len());
        Ok(())
    }

    // ── The make-before-break engine ──────────────────────────────

    /// Transition the HOST wiring from the commanded set to `new_plan`.
    /// All connects are issued and must succeed before the first
    /// disconnect goes out. A connect failure tears the new edges back
    /// down and reports a routing conflict; disconnect failures are
    /// logged (the edge may already be gone on the HOST).
    pub(crate) fn apply_transition(
        &mut self,
        new_plan: Vec<Connection>,
        scope: &mut SuppressionScope,
    ) -> Result<(), RigError> {
        let (to_connect, to_disconnect) = routing::transition(&self.commanded, &new_plan);
        let mut made: Vec<Connection> = Vec::new();
        for edge in &to_connect {
            match self.transport.connect_ports(&edge.src, &edge.dst) {
                Ok(()) => {
                    scope.expect(
                        Echo::Connect {
                            src: edge.src.clone(),
                            dst: edge.dst.clone(),
                        },
                        self.echo_deadline(),
                    );
                    made.push(edge.clone());
                }
                Err(e) => {
                    for undone in made.iter().rev() {
                        match self.transport.disconnect_ports(&undone.src, &undone.dst) {
                            Ok(()) => scope.expect(
                                Echo::Disconnect {
                                    src: undone.src.clone(),
                                    dst: undone.dst.clone(),
                                },
                                self.echo_deadline(),
                            ),
                            Err(e2) => {
                                log::warn!("rollback disconnect of {} failed: {}", undone, e2)
                            }
                        }
                    }
                    return Err(RigError::RoutingConflict(format!(
                        "connect {} failed: {}",
                        edge, e
                    )));
                }
            }
        }
        for edge in &to_disconnect {
            match self.transport.disconnect_ports(&edge.src, &edge.dst) {
                Ok(()) => scope.expect(
                    Echo::Disconnect {
                        src: edge.src.clone(),
                        dst: edge.dst.clone(),
                    },
                    self.echo_deadline(),
                ),
                Err(e) => log::warn!("could not disconnect {}: {}", edge, e),
            }
        }
        self.commanded = new_plan;
        Ok(())
    }
}
