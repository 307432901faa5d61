//! In-memory controller simulator
//!
//! Speaks the same CR-terminated ASCII protocol as the real controller so the
//! daemon can run without hardware (`--simulate`). Replies are queued as soon
//! as a command line is complete; the reader half hands them out like a serial
//! port with a read timeout.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::debug;
use crate::state::AXIS_COUNT;
use crate::transport::TransportHandles;

/// How long an idle read blocks before reporting a timeout
const READ_TIMEOUT: Duration = Duration::from_millis(20);

const START_POSITION: [f64; AXIS_COUNT] = [12345.0, -5678.0, 9012.0, 3456.0, -7890.0];

struct Programming {
    name: String,
    next_axis: usize,
    values: [f64; AXIS_COUNT],
}

struct SimState {
    outbound: VecDeque<u8>,
    inbound: Vec<u8>,
    current: [f64; AXIS_COUNT],
    positions: HashMap<String, [f64; AXIS_COUNT]>,
    programming: Option<Programming>,
    closed: bool,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Create a simulated controller connection
pub fn connect() -> TransportHandles {
    let mut state = SimState {
        outbound: VecDeque::new(),
        inbound: Vec::new(),
        current: START_POSITION,
        positions: HashMap::new(),
        programming: None,
        closed: false,
    };
    state.emit("Scorbot Simulator Ready.");
    state.emit("OK");

    let shared = Arc::new(Mutex::new(state));
    TransportHandles {
        reader: Box::new(SimReader(shared.clone())),
        writer: Box::new(SimWriter(shared)),
    }
}

struct SimReader(Shared);

impl Read for SimReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = lock(&self.0);
            if !state.outbound.is_empty() {
                let n = buf.len().min(state.outbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
        }
        thread::sleep(READ_TIMEOUT);
        Err(io::Error::new(ErrorKind::TimedOut, "no data"))
    }
}

struct SimWriter(Shared);

impl Write for SimWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.0);
        if state.closed {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "simulator closed"));
        }
        for &byte in buf {
            if byte == b'\r' || byte == b'\n' {
                let line = String::from_utf8_lossy(&state.inbound).trim().to_string();
                state.inbound.clear();
                if !line.is_empty() {
                    state.handle_line(&line);
                }
            } else {
                state.inbound.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SimWriter {
    fn drop(&mut self) {
        lock(&self.0).closed = true;
    }
}

impl SimState {
    fn emit(&mut self, line: &str) {
        self.outbound.extend(line.as_bytes());
        self.outbound.extend(b"\r\n");
    }

    fn emit_listing(&mut self, name: &str, values: [f64; AXIS_COUNT]) {
        self.emit(&format!("Position {} :", name));
        for (i, value) in values.iter().enumerate() {
            self.emit(&format!("Axis {} = {} counts", i + 1, value));
        }
        self.emit("OK");
    }

    fn handle_line(&mut self, line: &str) {
        debug!("Simulator received: {}", line);

        if let Some(programming) = self.programming.take() {
            self.accept_value(programming, line);
            return;
        }

        let upper = line.to_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();
        match words.as_slice() {
            ["HOME"] => {
                self.emit("Executing HOME...");
                for axis in 1..=AXIS_COUNT {
                    self.emit(&format!("Axis {} homed.", axis));
                }
                self.emit("Homing complete(robot)");
                self.emit("OK");
                self.current = [0.0; AXIS_COUNT];
            }
            ["LISTPV", "POSITION"] => {
                let current = self.current;
                self.emit_listing("POSITION", current);
            }
            ["LISTPV", name] => match self.positions.get(*name).copied() {
                Some(values) => self.emit_listing(name, values),
                None => self.emit(&format!("ERROR: Position {} not defined", name)),
            },
            ["SETPV", name] => {
                self.programming = Some(Programming {
                    name: name.to_string(),
                    next_axis: 1,
                    values: [0.0; AXIS_COUNT],
                });
                self.emit("Enter Axis 1 value:");
            }
            ["DEFP", name] => {
                let current = self.current;
                self.positions.insert(name.to_string(), current);
                self.emit("OK");
            }
            ["MOVE" | "MOVED" | "MOVEL" | "MOVELD", name] => match self.positions.get(*name).copied() {
                Some(values) => {
                    self.emit("Executing move...");
                    self.current = values;
                    self.emit("Move complete.");
                    self.emit("OK");
                }
                None => self.emit(&format!("ERROR: Position {} not defined", name)),
            },
            ["SPEED", _] | ["OPEN"] | ["CLOSE"] => self.emit("OK"),
            _ => self.emit("ERROR: Unknown command"),
        }
    }

    fn accept_value(&mut self, mut programming: Programming, line: &str) {
        let Ok(value) = line.trim().parse::<f64>() else {
            self.emit(&format!("ERROR: Invalid value '{}'", line));
            return;
        };

        programming.values[programming.next_axis - 1] = value;
        programming.next_axis += 1;

        if programming.next_axis > AXIS_COUNT {
            self.positions.insert(programming.name, programming.values);
            self.emit("OK");
        } else {
            self.emit(&format!("Enter Axis {} value:", programming.next_axis));
            self.programming = Some(programming);
        }
    }
}
