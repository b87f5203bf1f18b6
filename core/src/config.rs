//! TOML configuration: HOST address, hardware overrides, rack policy,
//! and the plugin whitelist. Missing file means built-in defaults;
//! unknown keys are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RigError;
use crate::plugin::PluginSpec;
use crate::routing::RoutingMode;

/// What to do when the HOST reports a structural change the client did
/// not request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalPolicy {
    /// Accept the change and mirror it into the registry
    #[default]
    Mirror,
    /// Treat it as a violation and issue the compensating request
    Enforce,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Command connection address
    pub url: String,
    /// Event feed address; defaults to the command port + 1
    pub feed_url: Option<String>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:5555".to_string(),
            feed_url: None,
            timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn feed_addr(&self) -> String {
        if let Some(feed) = &self.feed_url {
            return feed.clone();
        }
        // host:port -> host:port+1
        match self.url.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(p) => format!("{}:{}", host, p.wrapping_add(1)),
                Err(_) => self.url.clone(),
            },
            None => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Capture port override; replaces auto-detection when present
    pub inputs: Option<Vec<String>>,
    /// Playback port override
    pub outputs: Option<Vec<String>>,
    /// All-to-all at the input terminal
    pub join_audio_inputs: bool,
    /// All-to-all at the output terminal
    pub join_audio_outputs: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RackConfig {
    pub slots_limit: Option<usize>,
    pub routing_mode: RoutingMode,
    pub external_policy: ExternalPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub rack: RackConfig,
    pub plugins: Vec<PluginSpec>,
}

impl RigConfig {
    pub fn load(path: &Path) -> Result<Self, RigError> {
        let text = std::fs::read_to_string(path).map_err(|source| RigError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Load from the default location, falling back to defaults when the
    /// file is absent. Parse errors are still reported.
    pub fn load_or_default(path: &Path) -> Result<Self, RigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// `~/.config/pedalrig/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pedalrig")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
url = "10.0.0.2:9000"
timeout_ms = 1500

[hardware]
inputs = ["capture_1"]
outputs = ["playback_1", "playback_2"]
join_audio_outputs = true

[rack]
slots_limit = 6
routing_mode = "linear"
external_policy = "enforce"

[[plugins]]
name = "DS1"
uri = "urn:pedal:ds1"
category = "distortion"
inputs = ["in"]
outputs = ["out"]

[[plugins]]
name = "MVerb"
uri = "urn:pedal:mverb"
join_audio_inputs = true
"#;

    #[test]
    fn parses_sample() {
        let config: RigConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.url, "10.0.0.2:9000");
        assert_eq!(config.server.timeout_ms, 1500);
        assert_eq!(config.hardware.inputs.as_deref(), Some(&["capture_1".to_string()][..]));
        assert!(config.hardware.join_audio_outputs);
        assert_eq!(config.rack.slots_limit, Some(6));
        assert_eq!(config.rack.routing_mode, RoutingMode::Linear);
        assert_eq!(config.rack.external_policy, ExternalPolicy::Enforce);
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0].inputs.as_deref(), Some(&["in".to_string()][..]));
        assert!(config.plugins[1].join_audio_inputs);
    }

    #[test]
    fn defaults_when_sections_missing() {
        let config: RigConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.url, "127.0.0.1:5555");
        assert_eq!(config.server.timeout_ms, 5000);
        assert_eq!(config.rack.routing_mode, RoutingMode::HardBypass);
        assert_eq!(config.rack.external_policy, ExternalPolicy::Mirror);
        assert!(config.rack.slots_limit.is_none());
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn feed_addr_defaults_to_next_port() {
        let server = ServerConfig::default();
        assert_eq!(server.feed_addr(), "127.0.0.1:5556");
        let server = ServerConfig {
            feed_url: Some("10.0.0.2:7000".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(server.feed_addr(), "10.0.0.2:7000");
    }

    #[test]
    fn load_reads_file_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RigConfig::load(&path).unwrap();
        assert_eq!(config.plugins.len(), 2);

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            RigConfig::load(&missing),
            Err(RigError::ConfigRead { .. })
        ));
        let fallback = RigConfig::load_or_default(&missing).unwrap();
        assert_eq!(fallback.server.url, "127.0.0.1:5555");
    }
}
