//! Preset hooks: a chain snapshot as a JSON array of
//! `{index, uri, controls, bypassed}`. File handling is the embedder's
//! business; the core only converts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RigError;
use crate::rack::RackSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub index: usize,
    pub uri: String,
    #[serde(default)]
    pub controls: BTreeMap<String, f32>,
    #[serde(default)]
    pub bypassed: bool,
}

/// Capture the chain in order. Empty slots carry no plugin and are not
/// part of a preset.
pub fn from_snapshot(snapshot: &RackSnapshot) -> Vec<PresetEntry> {
    snapshot
        .slots
        .iter()
        .filter(|s| !s.uri.is_empty())
        .map(|s| PresetEntry {
            index: s.index,
            uri: s.uri.clone(),
            controls: s.controls.clone(),
            bypassed: s.bypassed,
        })
        .collect()
}

pub fn to_json(entries: &[PresetEntry]) -> Result<String, RigError> {
    Ok(serde_json::to_string_pretty(entries)?)
}

pub fn from_json(text: &str) -> Result<Vec<PresetEntry>, RigError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rack::{SlotSnapshot, SlotId};

    fn snapshot_slot(index: usize, label: &str, uri: &str) -> SlotSnapshot {
        SlotSnapshot {
            id: SlotId::new(),
            label: label.to_string(),
            index,
            uri: uri.to_string(),
            name: label.to_string(),
            category: String::new(),
            bypassed: false,
            controls: BTreeMap::new(),
        }
    }

    #[test]
    fn json_round_trip() {
        let mut entry = PresetEntry {
            index: 0,
            uri: "urn:pedal:ds1".to_string(),
            controls: BTreeMap::new(),
            bypassed: true,
        };
        entry.controls.insert("gain".to_string(), 0.75);
        let text = to_json(&[entry.clone()]).unwrap();
        let back = from_json(&text).unwrap();
        assert_eq!(back, vec![entry]);
    }

    #[test]
    fn defaults_for_missing_fields() {
        let entries = from_json(r#"[{"index": 0, "uri": "urn:pedal:ds1"}]"#).unwrap();
        assert!(entries[0].controls.is_empty());
        assert!(!entries[0].bypassed);
        assert!(from_json("not json").is_err());
    }

    #[test]
    fn snapshot_skips_empty_slots() {
        let snapshot = RackSnapshot {
            slots: vec![
                snapshot_slot(0, "DS1_0", "urn:pedal:ds1"),
                snapshot_slot(1, "hole", ""),
                snapshot_slot(2, "MVerb_1", "urn:pedal:mverb"),
            ],
        };
        let entries = from_snapshot(&snapshot);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].uri, "urn:pedal:ds1");
        assert_eq!(entries[1].index, 2);
    }
}
