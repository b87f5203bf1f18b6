//! Slot registry: the ordered chain mirror. Slots are created when an
//! `add` event is received and destroyed on `remove`; only the
//! orchestrator mutates the registry. Terminals are sentinels owned by
//! the orchestrator, never members of the sequence.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::RigError;
use crate::plugin::Plugin;
use crate::routing::Endpoint;

/// Stable local identity of a slot, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(Uuid);

impl SlotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One position in the chain. `label` is the HOST-assigned identifier,
/// unique across the chain for the lifetime of the plugin.
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: SlotId,
    pub label: String,
    pub index: usize,
    pub plugin: Option<Plugin>,
}

impl Slot {
    pub fn new(label: impl Into<String>, plugin: Option<Plugin>) -> Self {
        Self {
            id: SlotId::new(),
            label: label.into(),
            index: 0,
            plugin,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugin.is_none()
    }

    /// Routing view of this slot. Port paths are `<label>/<port>`.
    /// Empty slots have no view; routing skips them.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let plugin = self.plugin.as_ref()?;
        let path = |port: &String| format!("{}/{}", self.label, port);
        Some(Endpoint {
            audio_in: plugin.audio_in.iter().map(path).collect(),
            audio_out: plugin.audio_out.iter().map(path).collect(),
            midi_in: plugin.midi_in.iter().map(path).collect(),
            midi_out: plugin.midi_out.iter().map(path).collect(),
            join_audio_in: plugin.join_audio_inputs,
            join_audio_out: plugin.join_audio_outputs,
            join_midi_in: plugin.join_midi_inputs,
            join_midi_out: plugin.join_midi_outputs,
        })
    }
}

/// Which hardware side a terminal stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Input,
    Output,
}

/// Sentinel for the HOST's hardware ports. The input terminal's ports
/// face the chain as outputs; the output terminal's as inputs.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub kind: TerminalKind,
    pub audio: Vec<String>,
    pub midi: Vec<String>,
    pub join_audio: bool,
    pub join_midi: bool,
}

impl Terminal {
    pub fn new(kind: TerminalKind) -> Self {
        Self {
            kind,
            audio: Vec::new(),
            midi: Vec::new(),
            join_audio: false,
            join_midi: false,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self.kind {
            TerminalKind::Input => Endpoint {
                audio_out: self.audio.clone(),
                midi_out: self.midi.clone(),
                join_audio_out: self.join_audio,
                join_midi_out: self.join_midi,
                ..Endpoint::default()
            },
            TerminalKind::Output => Endpoint {
                audio_in: self.audio.clone(),
                midi_in: self.midi.clone(),
                join_audio_in: self.join_audio,
                join_midi_in: self.join_midi,
                ..Endpoint::default()
            },
        }
    }
}

/// Read-only copy of one slot for snapshots and notifications.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub label: String,
    pub index: usize,
    pub uri: String,
    pub name: String,
    pub category: String,
    pub bypassed: bool,
    pub controls: BTreeMap<String, f32>,
}

/// Read-only copy of the whole registry, published after every commit.
#[derive(Debug, Clone, Default)]
pub struct RackSnapshot {
    pub slots: Vec<SlotSnapshot>,
}

impl RackSnapshot {
    pub fn by_label(&self, label: &str) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.label == label)
    }

    pub fn by_id(&self, id: SlotId) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The ordered slot sequence. Every mutation reindexes so that
/// `slot.index` always equals its position.
#[derive(Debug, Default)]
pub struct Rack {
    slots: Vec<Slot>,
}

impl Rack {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Insert at `position`, clamped to the end. Returns the new index.
    pub fn insert(&mut self, position: Option<usize>, slot: Slot) -> usize {
        let at = position.unwrap_or(self.slots.len()).min(self.slots.len());
        self.slots.insert(at, slot);
        self.reindex();
        at
    }

    pub fn remove_by_label(&mut self, label: &str) -> Option<Slot> {
        let at = self.slots.iter().position(|s| s.label == label)?;
        let slot = self.slots.remove(at);
        self.reindex();
        Some(slot)
    }

    pub fn get_by_label(&self, label: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.label == label)
    }

    pub fn get_mut_by_label(&mut self, label: &str) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.label == label)
    }

    pub fn get_by_id(&self, id: SlotId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn move_slot(&mut self, from: usize, to: usize) -> Result<(), RigError> {
        if from >= self.slots.len() {
            return Err(RigError::SlotNotFound(format!("index {}", from)));
        }
        let slot = self.slots.remove(from);
        let to = to.min(self.slots.len());
        self.slots.insert(to, slot);
        self.reindex();
        Ok(())
    }

    pub fn clear(&mut self) -> Vec<Slot> {
        std::mem::take(&mut self.slots)
    }

    /// Labels in chain order (used by clear and preset save).
    pub fn labels(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.label.clone()).collect()
    }

    /// Routing views of the non-empty slots, in chain order.
    pub fn effective_endpoints(&self) -> Vec<Endpoint> {
        self.slots.iter().filter_map(|s| s.endpoint()).collect()
    }

    pub fn snapshot(&self) -> RackSnapshot {
        let slots = self
            .slots
            .iter()
            .map(|s| SlotSnapshot {
                id: s.id,
                label: s.label.clone(),
                index: s.index,
                uri: s.plugin.as_ref().map(|p| p.uri.clone()).unwrap_or_default(),
                name: s.plugin.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
                category: s
                    .plugin
                    .as_ref()
                    .map(|p| p.category.clone())
                    .unwrap_or_default(),
                bypassed: s.plugin.as_ref().map(|p| p.bypassed).unwrap_or(false),
                controls: s
                    .plugin
                    .as_ref()
                    .map(|p| p.controls.clone())
                    .unwrap_or_default(),
            })
            .collect();
        RackSnapshot { slots }
    }

    /// Labels unique and indices contiguous; the orchestrator checks
    /// this after every commit.
    pub fn check_invariants(&self) -> Result<(), RigError> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.index != i {
                return Err(RigError::InvariantViolation(format!(
                    "slot '{}' carries index {} at position {}",
                    slot.label, slot.index, i
                )));
            }
            if self.slots[..i].iter().any(|s| s.label == slot.label) {
                return Err(RigError::InvariantViolation(format!(
                    "label '{}' appears twice",
                    slot.label
                )));
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.index = i;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(label: &str) -> Slot {
        Slot::new(label, None)
    }

    #[test]
    fn insert_appends_by_default_and_reindexes() {
        let mut rack = Rack::new();
        rack.insert(None, slot("a"));
        rack.insert(None, slot("b"));
        rack.insert(Some(1), slot("c"));
        let labels = rack.labels();
        assert_eq!(labels, vec!["a", "c", "b"]);
        for (i, s) in rack.iter().enumerate() {
            assert_eq!(s.index, i);
        }
    }

    #[test]
    fn insert_position_is_clamped() {
        let mut rack = Rack::new();
        rack.insert(Some(99), slot("a"));
        assert_eq!(rack.get_by_label("a").unwrap().index, 0);
    }

    #[test]
    fn remove_reindexes_survivors() {
        let mut rack = Rack::new();
        rack.insert(None, slot("a"));
        rack.insert(None, slot("b"));
        rack.insert(None, slot("c"));
        let removed = rack.remove_by_label("b").unwrap();
        assert_eq!(removed.label, "b");
        assert_eq!(rack.get_by_label("c").unwrap().index, 1);
        assert!(rack.remove_by_label("b").is_none());
    }

    #[test]
    fn move_slot_reorders() {
        let mut rack = Rack::new();
        rack.insert(None, slot("a"));
        rack.insert(None, slot("b"));
        rack.insert(None, slot("c"));
        rack.move_slot(0, 2).unwrap();
        assert_eq!(rack.labels(), vec!["b", "c", "a"]);
        assert!(rack.move_slot(5, 0).is_err());
    }

    #[test]
    fn lookup_by_id() {
        let mut rack = Rack::new();
        let s = slot("a");
        let id = s.id;
        rack.insert(None, s);
        assert_eq!(rack.get_by_id(id).unwrap().label, "a");
    }

    #[test]
    fn invariant_check_catches_duplicate_labels() {
        let mut rack = Rack::new();
        rack.insert(None, slot("a"));
        rack.insert(None, slot("a"));
        assert!(matches!(
            rack.check_invariants(),
            Err(RigError::InvariantViolation(_))
        ));
    }

    #[test]
    fn empty_slots_are_invisible_to_routing() {
        let mut rack = Rack::new();
        rack.insert(None, slot("empty"));
        assert!(rack.effective_endpoints().is_empty());
    }

    #[test]
    fn terminal_endpoints_face_the_chain() {
        let mut input = Terminal::new(TerminalKind::Input);
        input.audio = vec!["capture_1".into()];
        let e = input.endpoint();
        assert_eq!(e.audio_out, vec!["capture_1"]);
        assert!(e.audio_in.is_empty());

        let mut output = Terminal::new(TerminalKind::Output);
        output.audio = vec!["playback_1".into()];
        output.join_audio = true;
        let e = output.endpoint();
        assert_eq!(e.audio_in, vec!["playback_1"]);
        assert!(e.join_audio_in);
    }
}
