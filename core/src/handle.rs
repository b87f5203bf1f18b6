//! RackHandle: the embedder's interface to the chain. Owns the intent
//! channel into the dispatcher thread, the notification receiver, and
//! the shared registry snapshot.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::RigConfig;
use crate::dispatcher::{Dispatcher, Intent};
use crate::error::RigError;
use crate::notify::Notification;
use crate::preset::{self, PresetEntry};
use crate::rack::{RackSnapshot, SlotId, SlotSnapshot};
use crate::transport::{HostEvent, HostTransport, TcpTransport};

pub struct RackHandle {
    intent_tx: Sender<Intent>,
    notifications: Receiver<Notification>,
    monitor: Arc<RwLock<RackSnapshot>>,
    join_handle: Option<JoinHandle<()>>,
}

fn disconnected() -> RigError {
    RigError::TransportFailure("dispatcher thread disconnected".to_string())
}

impl RackHandle {
    /// Connect to the HOST over TCP per the config and start the
    /// dispatcher thread.
    pub fn connect(config: RigConfig) -> Result<Self, RigError> {
        let (event_tx, event_rx) = mpsc::channel();
        let transport = TcpTransport::connect(
            &config.server.url,
            &config.server.feed_addr(),
            Duration::from_millis(config.server.timeout_ms),
            event_tx,
        )
        .map_err(|e| RigError::TransportFailure(e.to_string()))?;
        Ok(Self::with_transport(config, Box::new(transport), event_rx))
    }

    /// Run the dispatcher over an injected transport and event feed.
    pub fn with_transport(
        config: RigConfig,
        transport: Box<dyn HostTransport>,
        event_rx: Receiver<HostEvent>,
    ) -> Self {
        let (intent_tx, intent_rx) = mpsc::channel();
        let (notif_tx, notif_rx) = mpsc::channel();
        let monitor = Arc::new(RwLock::new(RackSnapshot::default()));
        let dispatcher = Dispatcher::new(
            &config,
            transport,
            intent_rx,
            event_rx,
            notif_tx,
            Arc::clone(&monitor),
        );
        let join_handle = thread::spawn(move || dispatcher.run());
        Self {
            intent_tx,
            notifications: notif_rx,
            monitor,
            join_handle: Some(join_handle),
        }
    }

    // ── Structural intents ────────────────────────────────────────

    pub fn request_add_plugin(
        &self,
        uri: &str,
        position: Option<usize>,
    ) -> Result<String, RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::Add {
                uri: uri.to_string(),
                position,
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    pub fn request_remove_plugin(&self, label: &str) -> Result<(), RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::Remove {
                label: label.to_string(),
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    /// Swap the plugin at `label` for `uri`; returns the new label.
    pub fn request_replace(&self, label: &str, uri: &str) -> Result<String, RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::Replace {
                label: label.to_string(),
                uri: uri.to_string(),
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    pub fn move_slot(&self, from: usize, to: usize) -> Result<(), RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::Move { from, to, reply })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    pub fn clear(&self) -> Result<(), RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::Clear { reply })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    // ── Control plane ─────────────────────────────────────────────

    /// Set a control value. Legal immediately after `request_add_plugin`
    /// returns: if the label is not visible yet the intent waits until
    /// the slot appears or the request timeout passes.
    pub fn set_param(&self, label: &str, symbol: &str, value: f32) -> Result<(), RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::SetParam {
                label: label.to_string(),
                symbol: symbol.to_string(),
                value,
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    pub fn set_bypass(&self, label: &str, on: bool) -> Result<(), RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::SetBypass {
                label: label.to_string(),
                on,
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    // ── Presets ───────────────────────────────────────────────────

    pub fn save_preset(&self) -> Vec<PresetEntry> {
        preset::from_snapshot(&self.slots())
    }

    pub fn load_preset(&self, entries: Vec<PresetEntry>) -> Result<(), RigError> {
        let (reply, rx) = mpsc::channel();
        self.intent_tx
            .send(Intent::LoadPreset { entries, reply })
            .map_err(|_| disconnected())?;
        rx.recv().unwrap_or_else(|_| Err(disconnected()))
    }

    // ── Snapshots & notifications ─────────────────────────────────

    pub fn slots(&self) -> RackSnapshot {
        self.monitor
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn get_slot_by_label(&self, label: &str) -> Option<SlotSnapshot> {
        self.slots().by_label(label).cloned()
    }

    pub fn get_slot(&self, id: SlotId) -> Option<SlotSnapshot> {
        self.slots().by_id(id).cloned()
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }
}

impl Drop for RackHandle {
    fn drop(&mut self) {
        let _ = self.intent_tx.send(Intent::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}
