//! Transport to the HOST: a request/response command connection and a
//! pushed event feed, decoded into typed events. The feed reader runs on
//! its own thread and hands every parsed event to the dispatcher for
//! serialization.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::mpsc::Sender;
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use regex::Regex;

use crate::error::RigError;
use crate::plugin::DiscoveredPorts;

/// The HOST's hardware port set, discovered at startup and replaced
/// whenever a `hardware` event arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwarePorts {
    pub audio_inputs: Vec<String>,
    pub audio_outputs: Vec<String>,
    pub midi_inputs: Vec<String>,
    pub midi_outputs: Vec<String>,
}

/// One event from the HOST's feed.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Add {
        label: String,
        uri: String,
        ports: DiscoveredPorts,
    },
    Remove {
        label: String,
    },
    Connect {
        src: String,
        dst: String,
    },
    Disconnect {
        src: String,
        dst: String,
    },
    ParamSet {
        label: String,
        symbol: String,
        value: f32,
    },
    Bypass {
        label: String,
        on: bool,
    },
    Hardware(HardwarePorts),
}

/// Request/response operations the core issues to the HOST.
pub trait HostTransport: Send {
    fn add_plugin(&mut self, uri: &str) -> Result<String, RigError>;
    fn remove_plugin(&mut self, label: &str) -> Result<(), RigError>;
    fn connect_ports(&mut self, src: &str, dst: &str) -> Result<(), RigError>;
    fn disconnect_ports(&mut self, src: &str, dst: &str) -> Result<(), RigError>;
    fn set_param(&mut self, label: &str, symbol: &str, value: f32) -> Result<(), RigError>;
    fn set_bypass(&mut self, label: &str, on: bool) -> Result<(), RigError>;
    fn list_hardware_ports(&mut self) -> Result<HardwarePorts, RigError>;
}

static GRAPH_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/graph/([^\s/]+)$").expect("graph path regex"));

fn graph_label(token: &str) -> Option<String> {
    GRAPH_PATH
        .captures(token)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `audio_in:a,b` -> `["a", "b"]`; `audio_in:` -> `[]`
fn keyed_list(token: &str, key: &str) -> Option<Vec<String>> {
    let rest = token.strip_prefix(key)?.strip_prefix(':')?;
    if rest.is_empty() {
        return Some(Vec::new());
    }
    Some(rest.split(',').map(|s| s.to_string()).collect())
}

fn parse_port_lists<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<DiscoveredPorts> {
    Some(DiscoveredPorts {
        audio_in: keyed_list(tokens.next()?, "audio_in")?,
        audio_out: keyed_list(tokens.next()?, "audio_out")?,
        midi_in: keyed_list(tokens.next()?, "midi_in")?,
        midi_out: keyed_list(tokens.next()?, "midi_out")?,
    })
}

/// Decode one feed line. Unknown or malformed lines yield `None`; the
/// feed reader logs and drops them.
pub fn parse_event(line: &str) -> Option<HostEvent> {
    let mut tokens = line.split_whitespace();
    match tokens.next()? {
        "add" => {
            let label = graph_label(tokens.next()?)?;
            let uri = tokens.next()?.to_string();
            let ports = parse_port_lists(tokens).unwrap_or_default();
            Some(HostEvent::Add { label, uri, ports })
        }
        "remove" => {
            let label = graph_label(tokens.next()?)?;
            Some(HostEvent::Remove { label })
        }
        "connect" => Some(HostEvent::Connect {
            src: tokens.next()?.to_string(),
            dst: tokens.next()?.to_string(),
        }),
        "disconnect" => Some(HostEvent::Disconnect {
            src: tokens.next()?.to_string(),
            dst: tokens.next()?.to_string(),
        }),
        "param_set" => Some(HostEvent::ParamSet {
            label: tokens.next()?.to_string(),
            symbol: tokens.next()?.to_string(),
            value: tokens.next()?.parse().ok()?,
        }),
        "bypass" => Some(HostEvent::Bypass {
            label: tokens.next()?.to_string(),
            on: matches!(tokens.next()?, "1" | "true"),
        }),
        "hardware" => {
            let ports = parse_port_lists(tokens)?;
            Some(HostEvent::Hardware(HardwarePorts {
                audio_inputs: ports.audio_in,
                audio_outputs: ports.audio_out,
                midi_inputs: ports.midi_in,
                midi_outputs: ports.midi_out,
            }))
        }
        _ => None,
    }
}

/// TCP implementation of the line protocol. One request line gets one
/// `ok ...` or `err ...` reply line; the feed connection only pushes.
pub struct TcpTransport {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    _feed_thread: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn connect(
        addr: &str,
        feed_addr: &str,
        timeout: Duration,
        events: Sender<HostEvent>,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);

        let feed = TcpStream::connect(feed_addr)?;
        feed.set_read_timeout(Some(Duration::from_millis(50)))?;
        let feed_thread = thread::spawn(move || feed_loop(feed, events));

        Ok(Self {
            stream,
            reader,
            _feed_thread: Some(feed_thread),
        })
    }

    fn request(&mut self, line: &str) -> Result<String, RigError> {
        writeln!(self.stream, "{}", line)
            .map_err(|e| RigError::TransportFailure(e.to_string()))?;
        let mut reply = String::new();
        match self.reader.read_line(&mut reply) {
            Ok(0) => Err(RigError::TransportFailure(
                "host closed the connection".to_string(),
            )),
            Ok(_) => {
                let reply = reply.trim();
                if let Some(rest) = reply.strip_prefix("ok") {
                    Ok(rest.trim().to_string())
                } else if let Some(rest) = reply.strip_prefix("err") {
                    Err(RigError::TransportFailure(rest.trim().to_string()))
                } else {
                    Err(RigError::TransportFailure(format!(
                        "unexpected reply: {}",
                        reply
                    )))
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(RigError::Timeout(format!("reply to '{}'", line)))
            }
            Err(e) => Err(RigError::TransportFailure(e.to_string())),
        }
    }
}

fn feed_loop(feed: TcpStream, events: Sender<HostEvent>) {
    let mut reader = BufReader::new(feed);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_event(line) {
                    Some(event) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    None => log::debug!("dropping unparsed host event: {}", line),
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(_) => break,
        }
    }
    log::warn!("host event feed closed");
}

impl HostTransport for TcpTransport {
    fn add_plugin(&mut self, uri: &str) -> Result<String, RigError> {
        let reply = self.request(&format!("add {}", uri))?;
        if reply.is_empty() {
            return Err(RigError::TransportFailure(
                "add reply carried no label".to_string(),
            ));
        }
        Ok(reply)
    }

    fn remove_plugin(&mut self, label: &str) -> Result<(), RigError> {
        self.request(&format!("remove {}", label)).map(|_| ())
    }

    fn connect_ports(&mut self, src: &str, dst: &str) -> Result<(), RigError> {
        self.request(&format!("connect {} {}", src, dst)).map(|_| ())
    }

    fn disconnect_ports(&mut self, src: &str, dst: &str) -> Result<(), RigError> {
        self.request(&format!("disconnect {} {}", src, dst))
            .map(|_| ())
    }

    fn set_param(&mut self, label: &str, symbol: &str, value: f32) -> Result<(), RigError> {
        self.request(&format!("param_set {} {} {}", label, symbol, value))
            .map(|_| ())
    }

    fn set_bypass(&mut self, label: &str, on: bool) -> Result<(), RigError> {
        self.request(&format!("bypass {} {}", label, if on { 1 } else { 0 }))
            .map(|_| ())
    }

    fn list_hardware_ports(&mut self) -> Result<HardwarePorts, RigError> {
        let reply = self.request("hardware")?;
        let ports = parse_port_lists(reply.split_whitespace())
            .ok_or_else(|| RigError::TransportFailure(format!("bad hardware reply: {}", reply)))?;
        Ok(HardwarePorts {
            audio_inputs: ports.audio_in,
            audio_outputs: ports.audio_out,
            midi_inputs: ports.midi_in,
            midi_outputs: ports.midi_out,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    #[test]
    fn parses_add_with_port_lists() {
        let event = parse_event(
            "add /graph/MVerb_1 urn:pedal:mverb audio_in:in_l,in_r audio_out:out midi_in: midi_out:",
        )
        .unwrap();
        match event {
            HostEvent::Add { label, uri, ports } => {
                assert_eq!(label, "MVerb_1");
                assert_eq!(uri, "urn:pedal:mverb");
                assert_eq!(ports.audio_in, vec!["in_l", "in_r"]);
                assert_eq!(ports.audio_out, vec!["out"]);
                assert!(ports.midi_in.is_empty());
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn parses_remove_connect_param_bypass() {
        assert_eq!(
            parse_event("remove /graph/DS1_0"),
            Some(HostEvent::Remove {
                label: "DS1_0".to_string()
            })
        );
        assert_eq!(
            parse_event("connect DS1_0/out playback_1"),
            Some(HostEvent::Connect {
                src: "DS1_0/out".to_string(),
                dst: "playback_1".to_string()
            })
        );
        assert_eq!(
            parse_event("param_set DS1_0 gain 0.5"),
            Some(HostEvent::ParamSet {
                label: "DS1_0".to_string(),
                symbol: "gain".to_string(),
                value: 0.5
            })
        );
        assert_eq!(
            parse_event("bypass DS1_0 1"),
            Some(HostEvent::Bypass {
                label: "DS1_0".to_string(),
                on: true
            })
        );
    }

    #[test]
    fn parses_hardware_replacement() {
        let event =
            parse_event("hardware audio_in:capture_1,capture_2 audio_out:playback_1 midi_in:midi_0 midi_out:")
                .unwrap();
        match event {
            HostEvent::Hardware(ports) => {
                assert_eq!(ports.audio_inputs, vec!["capture_1", "capture_2"]);
                assert_eq!(ports.midi_inputs, vec!["midi_0"]);
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_event("").is_none());
        assert!(parse_event("frobnicate x y").is_none());
        assert!(parse_event("add not-a-graph-path uri").is_none());
        assert!(parse_event("remove /graph/").is_none());
        assert!(parse_event("param_set DS1_0 gain not-a-number").is_none());
    }

    #[test]
    fn tcp_request_reply_and_feed() {
        let cmd_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let feed_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let cmd_addr = cmd_listener.local_addr().unwrap().to_string();
        let feed_addr = feed_listener.local_addr().unwrap().to_string();

        let host = std::thread::spawn(move || {
            let (mut feed, _) = feed_listener.accept().unwrap();
            let (cmd, _) = cmd_listener.accept().unwrap();
            let mut reader = BufReader::new(cmd.try_clone().unwrap());
            let mut cmd = cmd;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line.trim(), "add urn:pedal:mverb");
            writeln!(cmd, "ok MVerb_0").unwrap();
            writeln!(feed, "add /graph/MVerb_0 urn:pedal:mverb audio_in:in audio_out:out midi_in: midi_out:").unwrap();

            line.clear();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line.trim(), "remove MVerb_0");
            writeln!(cmd, "err no such plugin").unwrap();
        });

        let (tx, rx) = mpsc::channel();
        let mut transport =
            TcpTransport::connect(&cmd_addr, &feed_addr, Duration::from_secs(2), tx).unwrap();

        let label = transport.add_plugin("urn:pedal:mverb").unwrap();
        assert_eq!(label, "MVerb_0");

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, HostEvent::Add { ref label, .. } if label == "MVerb_0"));

        let err = transport.remove_plugin("MVerb_0").unwrap_err();
        assert!(matches!(err, RigError::TransportFailure(ref d) if d == "no such plugin"));

        host.join().unwrap();
    }
}
