//! pedalrig: headless control client for the plugin HOST. Loads the
//! config, connects, and drives the chain from a small line REPL.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use simplelog::{Config as LogConfig, LevelFilter, TermLogger, TerminalMode, WriteLogger};

use pedalrig_core::{default_config_path, preset, Notification, RackHandle, RigConfig};

fn init_logging() {
    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pedalrig")
        .join("pedalrig.log");
    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match fs::File::create(&log_path) {
        Ok(file) => {
            let _ = WriteLogger::init(LevelFilter::Info, LogConfig::default(), file);
        }
        Err(_) => {
            let _ = TermLogger::init(
                LevelFilter::Warn,
                LogConfig::default(),
                TerminalMode::Stderr,
                simplelog::ColorChoice::Auto,
            );
        }
    }
}

fn config_path_from_args() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    default_config_path()
}

fn print_notifications(handle: &RackHandle) {
    for notification in handle.drain_notifications() {
        match notification {
            Notification::SlotAdded(slot) => {
                println!("+ slot {} [{}] {}", slot.index, slot.label, slot.name)
            }
            Notification::SlotRemoved { label } => println!("- slot [{}]", label),
            Notification::ParamChanged {
                label,
                symbol,
                value,
            } => println!("~ {} {} = {}", label, symbol, value),
            Notification::BypassChanged { label, on } => {
                println!("~ {} bypass {}", label, if on { "on" } else { "off" })
            }
            Notification::HardwareChanged(ports) => println!(
                "~ hardware: {} in, {} out",
                ports.audio_inputs.len(),
                ports.audio_outputs.len()
            ),
            Notification::Error { kind, detail } => println!("! {}: {}", kind, detail),
        }
    }
}

fn print_slots(handle: &RackHandle) {
    let snapshot = handle.slots();
    if snapshot.is_empty() {
        println!("(empty chain)");
        return;
    }
    for slot in &snapshot.slots {
        let bypass = if slot.bypassed { " [bypassed]" } else { "" };
        println!("{:2}  {:16}  {}{}", slot.index, slot.label, slot.uri, bypass);
        for (symbol, value) in &slot.controls {
            println!("      {} = {}", symbol, value);
        }
    }
}

const HELP: &str = "\
commands:
  add <uri> [position]       add a plugin to the chain
  remove <label>             remove a plugin
  replace <label> <uri>      swap a plugin in place
  move <from> <to>           reorder the chain
  clear                      remove everything
  set <label> <sym> <value>  set a control value
  bypass <label> <on|off>    toggle bypass
  slots                      show the chain
  save <file>                write the chain as a preset
  load <file>                load a preset file
  quit";

fn run_command(handle: &RackHandle, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let result: Result<(), String> = match parts.as_slice() {
        [] => Ok(()),
        ["quit"] | ["exit"] => return false,
        ["help"] => {
            println!("{}", HELP);
            Ok(())
        }
        ["slots"] => {
            print_slots(handle);
            Ok(())
        }
        ["add", uri] => handle
            .request_add_plugin(uri, None)
            .map(|label| println!("added as {}", label))
            .map_err(|e| e.to_string()),
        ["add", uri, position] => match position.parse() {
            Ok(position) => handle
                .request_add_plugin(uri, Some(position))
                .map(|label| println!("added as {}", label))
                .map_err(|e| e.to_string()),
            Err(_) => Err(format!("bad position: {}", position)),
        },
        ["remove", label] => handle
            .request_remove_plugin(label)
            .map_err(|e| e.to_string()),
        ["replace", label, uri] => handle
            .request_replace(label, uri)
            .map(|new_label| println!("replaced by {}", new_label))
            .map_err(|e| e.to_string()),
        ["move", from, to] => match (from.parse(), to.parse()) {
            (Ok(from), Ok(to)) => handle.move_slot(from, to).map_err(|e| e.to_string()),
            _ => Err("move takes two indices".to_string()),
        },
        ["clear"] => handle.clear().map_err(|e| e.to_string()),
        ["set", label, symbol, value] => match value.parse() {
            Ok(value) => handle
                .set_param(label, symbol, value)
                .map_err(|e| e.to_string()),
            Err(_) => Err(format!("bad value: {}", value)),
        },
        ["bypass", label, on] => handle
            .set_bypass(label, matches!(*on, "on" | "1" | "true"))
            .map_err(|e| e.to_string()),
        ["save", path] => preset::to_json(&handle.save_preset())
            .map_err(|e| e.to_string())
            .and_then(|text| fs::write(path, text).map_err(|e| e.to_string()))
            .map(|_| println!("saved")),
        ["load", path] => fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| preset::from_json(&text).map_err(|e| e.to_string()))
            .and_then(|entries| handle.load_preset(entries).map_err(|e| e.to_string()))
            .map(|_| println!("loaded")),
        _ => Err(format!("unknown command: {} (try 'help')", line)),
    };
    if let Err(message) = result {
        println!("error: {}", message);
    }
    print_notifications(handle);
    true
}

fn main() -> io::Result<()> {
    init_logging();

    let config_path = config_path_from_args();
    let config = match RigConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    log::info!("config loaded from {}", config_path.display());

    let handle = match RackHandle::connect(config) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("could not reach the host: {}", e);
            std::process::exit(1);
        }
    };

    println!("pedalrig — 'help' for commands");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if !run_command(&handle, line.trim()) {
            break;
        }
    }
    Ok(())
}
