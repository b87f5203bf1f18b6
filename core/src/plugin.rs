//! Port model: whitelist entries from the config, instantiated plugins
//! with their effective port lists and control surface.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::error::RigError;

/// A whitelist entry from the `[[plugins]]` config table. Port lists, if
/// present, override whatever the HOST reports, verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub category: String,
    /// Audio input port-name override
    pub inputs: Option<Vec<String>>,
    /// Audio output port-name override
    pub outputs: Option<Vec<String>>,
    pub midi_inputs: Option<Vec<String>>,
    pub midi_outputs: Option<Vec<String>>,
    #[serde(default)]
    pub join_audio_inputs: bool,
    #[serde(default)]
    pub join_audio_outputs: bool,
    #[serde(default)]
    pub join_midi_inputs: bool,
    #[serde(default)]
    pub join_midi_outputs: bool,
}

/// Port lists the HOST reported for one instance (from the `add` event).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredPorts {
    pub audio_in: Vec<String>,
    pub audio_out: Vec<String>,
    pub midi_in: Vec<String>,
    pub midi_out: Vec<String>,
}

impl DiscoveredPorts {
    pub fn is_empty(&self) -> bool {
        self.audio_in.is_empty()
            && self.audio_out.is_empty()
            && self.midi_in.is_empty()
            && self.midi_out.is_empty()
    }
}

/// One plugin instance attached to a slot. The descriptor fields are
/// fixed at instantiation; `controls` and `bypassed` track the HOST.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub uri: String,
    pub name: String,
    pub category: String,
    pub audio_in: Vec<String>,
    pub audio_out: Vec<String>,
    pub midi_in: Vec<String>,
    pub midi_out: Vec<String>,
    pub join_audio_inputs: bool,
    pub join_audio_outputs: bool,
    pub join_midi_inputs: bool,
    pub join_midi_outputs: bool,
    pub controls: BTreeMap<String, f32>,
    pub bypassed: bool,
}

impl Plugin {
    /// True when no port list carries an entry. Happens when the add echo
    /// timed out and the config has no overrides for the URI.
    pub fn has_no_ports(&self) -> bool {
        self.audio_in.is_empty()
            && self.audio_out.is_empty()
            && self.midi_in.is_empty()
            && self.midi_out.is_empty()
    }

    /// Fill in HOST-reported ports, respecting config overrides already
    /// applied at instantiation (non-empty lists are kept).
    pub fn adopt_discovered(&mut self, ports: &DiscoveredPorts) {
        if self.audio_in.is_empty() {
            self.audio_in = ports.audio_in.clone();
        }
        if self.audio_out.is_empty() {
            self.audio_out = ports.audio_out.clone();
        }
        if self.midi_in.is_empty() {
            self.midi_in = ports.midi_in.clone();
        }
        if self.midi_out.is_empty() {
            self.midi_out = ports.midi_out.clone();
        }
    }
}

/// The configured whitelist, keyed by URI. Built once at startup.
#[derive(Debug, Default)]
pub struct PluginCatalog {
    specs: HashMap<String, PluginSpec>,
}

impl PluginCatalog {
    pub fn new(specs: Vec<PluginSpec>) -> Self {
        let specs = specs.into_iter().map(|s| (s.uri.clone(), s)).collect();
        Self { specs }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.specs.contains_key(uri)
    }

    pub fn get(&self, uri: &str) -> Option<&PluginSpec> {
        self.specs.get(uri)
    }

    /// Instantiate a whitelisted plugin. Config overrides beat the
    /// HOST-reported lists; the HOST fills whatever the config left out.
    pub fn instantiate(&self, uri: &str, discovered: &DiscoveredPorts) -> Result<Plugin, RigError> {
        let spec = self
            .specs
            .get(uri)
            .ok_or_else(|| RigError::UnsupportedPlugin(uri.to_string()))?;
        Ok(Plugin {
            uri: spec.uri.clone(),
            name: spec.name.clone(),
            category: spec.category.clone(),
            audio_in: spec
                .inputs
                .clone()
                .unwrap_or_else(|| discovered.audio_in.clone()),
            audio_out: spec
                .outputs
                .clone()
                .unwrap_or_else(|| discovered.audio_out.clone()),
            midi_in: spec
                .midi_inputs
                .clone()
                .unwrap_or_else(|| discovered.midi_in.clone()),
            midi_out: spec
                .midi_outputs
                .clone()
                .unwrap_or_else(|| discovered.midi_out.clone()),
            join_audio_inputs: spec.join_audio_inputs,
            join_audio_outputs: spec.join_audio_outputs,
            join_midi_inputs: spec.join_midi_inputs,
            join_midi_outputs: spec.join_midi_outputs,
            controls: BTreeMap::new(),
            bypassed: false,
        })
    }

    /// Build a plugin for an externally added URI outside the whitelist
    /// (mirror policy: the HOST is authoritative). Host ports, default
    /// hints, display name derived from the URI tail.
    pub fn foreign(&self, uri: &str, discovered: &DiscoveredPorts) -> Plugin {
        let name = uri
            .rsplit(['/', '#'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(uri)
            .to_string();
        Plugin {
            uri: uri.to_string(),
            name,
            category: String::new(),
            audio_in: discovered.audio_in.clone(),
            audio_out: discovered.audio_out.clone(),
            midi_in: discovered.midi_in.clone(),
            midi_out: discovered.midi_out.clone(),
            join_audio_inputs: false,
            join_audio_outputs: false,
            join_midi_inputs: false,
            join_midi_outputs: false,
            controls: BTreeMap::new(),
            bypassed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(uri: &str) -> PluginSpec {
        PluginSpec {
            name: "Test".to_string(),
            uri: uri.to_string(),
            category: "fx".to_string(),
            inputs: None,
            outputs: None,
            midi_inputs: None,
            midi_outputs: None,
            join_audio_inputs: false,
            join_audio_outputs: false,
            join_midi_inputs: false,
            join_midi_outputs: false,
        }
    }

    fn discovered() -> DiscoveredPorts {
        DiscoveredPorts {
            audio_in: vec!["in_l".into(), "in_r".into()],
            audio_out: vec!["out_l".into(), "out_r".into()],
            midi_in: vec!["midi_in".into()],
            midi_out: vec![],
        }
    }

    #[test]
    fn instantiate_uses_discovered_ports() {
        let catalog = PluginCatalog::new(vec![spec("urn:test:verb")]);
        let plugin = catalog.instantiate("urn:test:verb", &discovered()).unwrap();
        assert_eq!(plugin.audio_in, vec!["in_l", "in_r"]);
        assert_eq!(plugin.midi_in, vec!["midi_in"]);
        assert!(plugin.midi_out.is_empty());
    }

    #[test]
    fn override_replaces_discovered_verbatim() {
        let mut s = spec("urn:test:verb");
        s.inputs = Some(vec!["in".into()]);
        s.midi_inputs = Some(vec![]);
        let catalog = PluginCatalog::new(vec![s]);
        let plugin = catalog.instantiate("urn:test:verb", &discovered()).unwrap();
        // Audio-in overridden, midi-in overridden to empty, the rest discovered
        assert_eq!(plugin.audio_in, vec!["in"]);
        assert!(plugin.midi_in.is_empty());
        assert_eq!(plugin.audio_out, vec!["out_l", "out_r"]);
    }

    #[test]
    fn unknown_uri_is_rejected() {
        let catalog = PluginCatalog::new(vec![]);
        let err = catalog.instantiate("urn:test:unknown", &discovered()).unwrap_err();
        assert!(matches!(err, RigError::UnsupportedPlugin(_)));
    }

    #[test]
    fn foreign_name_from_uri_tail() {
        let catalog = PluginCatalog::new(vec![]);
        let p = catalog.foreign("http://example.org/plugs#MVerb", &discovered());
        assert_eq!(p.name, "MVerb");
        let p = catalog.foreign("urn:opaque", &DiscoveredPorts::default());
        assert_eq!(p.name, "urn:opaque");
    }

    #[test]
    fn adopt_discovered_keeps_overrides() {
        let mut s = spec("urn:test:verb");
        s.inputs = Some(vec!["in".into()]);
        let catalog = PluginCatalog::new(vec![s]);
        let mut plugin = catalog
            .instantiate("urn:test:verb", &DiscoveredPorts::default())
            .unwrap();
        assert!(plugin.audio_out.is_empty());
        plugin.adopt_discovered(&discovered());
        assert_eq!(plugin.audio_in, vec!["in"]);
        assert_eq!(plugin.audio_out, vec!["out_l", "out_r"]);
    }
}
