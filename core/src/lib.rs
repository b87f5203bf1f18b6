//! pedalrig-core: a reactive client for a linear chain of audio/MIDI
//! plugins hosted by an external plugin host. The HOST owns the graph;
//! this crate sends requests, absorbs the echoes of its own edits, and
//! reconciles everything else into a mirrored slot registry.
//!
//! Structural edits are make-before-break: new signal paths are created
//! and acknowledged before old ones are torn down, so the chain is never
//! silent mid-edit.

pub mod config;
pub mod error;
pub mod notify;
pub mod plugin;
pub mod preset;
pub mod rack;
pub mod routing;
pub mod suppress;
pub mod transport;

mod dispatcher;
mod handle;
mod orchestrator;

pub use config::{default_config_path, ExternalPolicy, RigConfig};
pub use error::RigError;
pub use handle::RackHandle;
pub use notify::Notification;
pub use plugin::{DiscoveredPorts, Plugin, PluginCatalog, PluginSpec};
pub use preset::PresetEntry;
pub use rack::{RackSnapshot, SlotId, SlotSnapshot};
pub use routing::{Connection, RoutingMode};
pub use transport::{HardwarePorts, HostEvent, HostTransport, TcpTransport};
