//! Routing engine: pure computation of the directed connections that
//! realize an effective chain. No I/O here; the orchestrator issues the
//! resulting edges to the HOST.

use std::fmt;

use serde::Deserialize;

/// One directed edge between two opaque HOST port paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub src: String,
    pub dst: String,
}

impl Connection {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// How the chain is wired across slots. Selected by `rack.routing_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Only between adjacent non-empty slots, both media together
    Linear,
    /// Each output scans forward to the nearest matching-media input;
    /// slots lacking a medium are invisible to that medium
    #[default]
    HardBypass,
    /// Two parallel tracks, one across audio-bearing slots, one across
    /// MIDI-bearing slots
    DualTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Media {
    Audio,
    Midi,
}

/// Directional port view of one chain element (slot or terminal). Port
/// entries are full HOST paths; terminals expose hardware ports on the
/// side that faces the chain.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub audio_in: Vec<String>,
    pub audio_out: Vec<String>,
    pub midi_in: Vec<String>,
    pub midi_out: Vec<String>,
    pub join_audio_in: bool,
    pub join_audio_out: bool,
    pub join_midi_in: bool,
    pub join_midi_out: bool,
}

impl Endpoint {
    fn outs(&self, media: Media) -> &[String] {
        match media {
            Media::Audio => &self.audio_out,
            Media::Midi => &self.midi_out,
        }
    }

    fn ins(&self, media: Media) -> &[String] {
        match media {
            Media::Audio => &self.audio_in,
            Media::Midi => &self.midi_in,
        }
    }

    fn join_out(&self, media: Media) -> bool {
        match media {
            Media::Audio => self.join_audio_out,
            Media::Midi => self.join_midi_out,
        }
    }

    fn join_in(&self, media: Media) -> bool {
        match media {
            Media::Audio => self.join_audio_in,
            Media::Midi => self.join_midi_in,
        }
    }

    fn bears(&self, media: Media) -> bool {
        !self.outs(media).is_empty() || !self.ins(media).is_empty()
    }
}

/// Pair an ordered output list against an ordered input list.
///
/// With `join` set the result is the full Cartesian product. Otherwise:
/// equal counts pair index-wise, a single output fans out, a single input
/// fans in, surplus outputs fold into the last input, and the last output
/// duplicates into surplus inputs.
pub fn pair_ports(outs: &[String], ins: &[String], join: bool) -> Vec<Connection> {
    let (m, n) = (outs.len(), ins.len());
    if m == 0 || n == 0 {
        return Vec::new();
    }
    if join {
        let mut pairs = Vec::with_capacity(m * n);
        for o in outs {
            for i in ins {
                pairs.push(Connection::new(o.clone(), i.clone()));
            }
        }
        return pairs;
    }
    let mut pairs = Vec::with_capacity(m.max(n));
    for k in 0..m.max(n) {
        let o = &outs[k.min(m - 1)];
        let i = &ins[k.min(n - 1)];
        pairs.push(Connection::new(o.clone(), i.clone()));
    }
    pairs
}

/// The pure source-to-destination rule of the engine: audio pairs first,
/// then MIDI pairs. Join applies when either side requests it.
pub fn connect_pair(src: &Endpoint, dst: &Endpoint) -> Vec<Connection> {
    let mut edges = pair_ports(
        &src.audio_out,
        &dst.audio_in,
        src.join_audio_out || dst.join_audio_in,
    );
    edges.extend(pair_ports(
        &src.midi_out,
        &dst.midi_in,
        src.join_midi_out || dst.join_midi_in,
    ));
    edges
}

/// Full desired edge set for an effective chain
/// `[input_terminal, slot..., output_terminal]` (empty slots already
/// removed by the caller). Audio edges come first, then MIDI, each in
/// chain order. Deterministic: same inputs, same sequence.
pub fn plan(chain: &[Endpoint], mode: RoutingMode) -> Vec<Connection> {
    let mut edges = media_edges(chain, mode, Media::Audio);
    edges.extend(media_edges(chain, mode, Media::Midi));
    edges
}

fn media_edges(chain: &[Endpoint], mode: RoutingMode, media: Media) -> Vec<Connection> {
    let mut edges = Vec::new();
    match mode {
        RoutingMode::Linear => {
            for pair in chain.windows(2) {
                edges.extend(edges_between(&pair[0], &pair[1], media));
            }
        }
        RoutingMode::HardBypass => {
            for (i, src) in chain.iter().enumerate() {
                if src.outs(media).is_empty() {
                    continue;
                }
                if let Some(dst) = chain[i + 1..].iter().find(|e| !e.ins(media).is_empty()) {
                    edges.extend(edges_between(src, dst, media));
                }
            }
        }
        RoutingMode::DualTrack => {
            let track: Vec<&Endpoint> = chain.iter().filter(|e| e.bears(media)).collect();
            for pair in track.windows(2) {
                edges.extend(edges_between(pair[0], pair[1], media));
            }
        }
    }
    edges
}

fn edges_between(src: &Endpoint, dst: &Endpoint, media: Media) -> Vec<Connection> {
    pair_ports(
        src.outs(media),
        dst.ins(media),
        src.join_out(media) || dst.join_in(media),
    )
}

/// Ordered difference of two plans: `(to_connect, to_disconnect)`.
/// `to_connect` keeps `new`'s order, `to_disconnect` keeps `old`'s; this
/// is what makes the make-before-break traces stable.
pub fn transition(old: &[Connection], new: &[Connection]) -> (Vec<Connection>, Vec<Connection>) {
    let to_connect = new
        .iter()
        .filter(|c| !old.contains(c))
        .cloned()
        .collect();
    let to_disconnect = old
        .iter()
        .filter(|c| !new.contains(c))
        .cloned()
        .collect();
    (to_connect, to_disconnect)
}
