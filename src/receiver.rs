//! Background line receiver
//!
//! A dedicated thread drains the transport, splits the byte stream into
//! lines and pushes each non-empty line onto a shared FIFO. The consumer side
//! polls the FIFO without blocking.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use crate::{AclError, Result};

/// Pause after a `WouldBlock` read so non-blocking transports do not spin
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct QueueState {
    lines: VecDeque<String>,
    closed: bool,
}

/// Single-producer, single-consumer FIFO of received lines
///
/// Push and pop are serialized; nothing here arbitrates between two consumers.
#[derive(Debug, Clone, Default)]
pub struct LineQueue {
    state: Arc<Mutex<QueueState>>,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, line: String) {
        self.lock().lines.push_back(line);
    }

    /// Oldest queued line, if any; never waits
    pub fn pop_line(&self) -> Option<String> {
        self.lock().lines.pop_front()
    }

    /// Copy of the currently queued lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark that no further lines will ever be pushed
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Discard every queued line and return how many were dropped
    ///
    /// Runs before soliciting the next command so that unsolicited device
    /// chatter is never attributed to that command's response. Only lines
    /// already queued are drained; this never waits for more.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(line) = self.pop_line() {
            debug!("Discarding stray line: {}", line);
            count += 1;
        }
        if count > 0 {
            info!("Drained {} stray line(s) before next command", count);
        }
        count
    }
}

/// Handle to the background reader thread
pub struct LineReceiver {
    queue: LineQueue,
    stop_signal: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LineReceiver {
    /// Start reading from `reader` into `queue` on a new thread
    pub fn spawn<R>(reader: R, queue: LineQueue) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let queue = queue.clone();
            let stop_signal = stop_signal.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("acl-line-receiver".to_string())
                .spawn(move || {
                    read_loop(reader, &queue, &stop_signal);
                    running.store(false, Ordering::Relaxed);
                    queue.close();
                })
                .map_err(|e| AclError::Connection(format!("Failed to start receiver thread: {}", e)))?
        };

        info!("Line receiver started");
        Ok(Self {
            queue,
            stop_signal,
            running,
            handle: Some(handle),
        })
    }

    pub fn pop_line(&self) -> Option<String> {
        self.queue.pop_line()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.queue.snapshot()
    }

    /// False once the thread has exited, whether asked to or not
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signal the thread to stop and wait for it to exit
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Line receiver thread panicked");
            }
            info!("Line receiver stopped");
        }
    }
}

impl Drop for LineReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop<R: Read>(mut reader: R, queue: &LineQueue, stop_signal: &AtomicBool) {
    let mut pending: Vec<u8> = Vec::new();
    let mut buffer = [0u8; 256];

    while !stop_signal.load(Ordering::Relaxed) {
        match reader.read(&mut buffer) {
            Ok(0) => {
                info!("Transport closed; receiver stopping");
                break;
            }
            Ok(n) => {
                for &byte in &buffer[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        flush_line(&mut pending, queue);
                    } else {
                        pending.push(byte);
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(IDLE_BACKOFF),
            Err(e) => {
                error!("Transport read failed: {}; receiver stopping", e);
                break;
            }
        }
    }

    flush_line(&mut pending, queue);
}

fn flush_line(pending: &mut Vec<u8>, queue: &LineQueue) {
    if pending.is_empty() {
        return;
    }
    let line = decode_line(pending);
    pending.clear();
    if !line.is_empty() {
        info!("<-- [RX] {}", line);
        queue.push(line);
    }
}

/// Decode permissively: bytes that are not valid UTF-8 are dropped
fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}
