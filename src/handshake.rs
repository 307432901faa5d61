//! Interactive position programming
//!
//! Commands such as `SETPV <name>` make the controller prompt for each axis
//! value in turn (`Enter Axis N value:`) and finish with `OK`. The driver
//! answers those prompts from the cached joint vector.
//!
//! ```text
//! START -> AWAIT_PROMPT(1) -> VALUE_SENT(1) -> ... -> VALUE_SENT(5) -> AWAIT_ACK -> SUCCESS
//!            any failure ------------------------------------------------------> FAILED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use crate::config::HandshakeConfig;
use crate::grammar::{is_ack, LineGrammar, LineShape};
use crate::receiver::LineQueue;
use crate::state::{RobotStateCache, AXIS_COUNT};
use crate::transport::CommandSender;

/// Terminal result of a handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandshakeVerdict {
    Success,
    NoCachedState,
    SendFailed { reason: String },
    WrongAxisOrder { expected: u32, received: u32 },
    PromptTimeout { axis: u32 },
    NoFinalAck,
}

impl HandshakeVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, HandshakeVerdict::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// The initiating command was written
    CommandSent { command: String },
    Received { line: String },
    ValueSent { axis: u32, value: String },
}

/// Everything observed and sent during one handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeTranscript {
    pub command: String,
    pub events: Vec<TranscriptEvent>,
    pub verdict: HandshakeVerdict,
}

impl HandshakeTranscript {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            events: Vec::new(),
            verdict: HandshakeVerdict::NoCachedState,
        }
    }

    /// Values sent in reply to prompts, in order
    pub fn sent_values(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TranscriptEvent::ValueSent { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    fn finish(mut self, verdict: HandshakeVerdict) -> Self {
        match &verdict {
            HandshakeVerdict::Success => info!("Handshake for '{}' succeeded", self.command),
            other => warn!("Handshake for '{}' failed: {:?}", self.command, other),
        }
        self.verdict = verdict;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HandshakeTimings {
    pub prompt_timeout: Duration,
    pub ack_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&HandshakeConfig> for HandshakeTimings {
    fn from(config: &HandshakeConfig) -> Self {
        Self {
            prompt_timeout: config.prompt_timeout(),
            ack_timeout: config.ack_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

impl Default for HandshakeTimings {
    fn default() -> Self {
        Self::from(&HandshakeConfig::default())
    }
}

pub struct HandshakeDriver {
    timings: HandshakeTimings,
    grammar: LineGrammar,
    cache: RobotStateCache,
}

impl HandshakeDriver {
    pub fn new(timings: HandshakeTimings, grammar: LineGrammar, cache: RobotStateCache) -> Self {
        Self { timings, grammar, cache }
    }

    /// Send `command` and answer its five axis prompts from the cached joints
    ///
    /// Nothing is written when no joint vector is cached.
    pub async fn run(&self, queue: &LineQueue, sender: &mut CommandSender, command: &str) -> HandshakeTranscript {
        let mut transcript = HandshakeTranscript::new(command);

        let Some(joints) = self.cache.get() else {
            return transcript.finish(HandshakeVerdict::NoCachedState);
        };

        if let Err(e) = sender.send(command) {
            return transcript.finish(HandshakeVerdict::SendFailed { reason: e.to_string() });
        }
        transcript.events.push(TranscriptEvent::CommandSent { command: command.to_string() });
        info!("Programming '{}' from cached joints {}", command, joints);

        let values: [f64; AXIS_COUNT] = joints.values();
        for (index, value) in values.iter().enumerate() {
            let axis = index as u32 + 1;
            let deadline = Instant::now() + self.timings.prompt_timeout;

            loop {
                let Some(line) = queue.pop_line() else {
                    if Instant::now() >= deadline {
                        return transcript.finish(HandshakeVerdict::PromptTimeout { axis });
                    }
                    sleep(self.timings.poll_interval).await;
                    continue;
                };

                let shape = self.grammar.classify(&line);
                transcript.events.push(TranscriptEvent::Received { line });

                match shape {
                    LineShape::Prompt { axis: prompted } if prompted == axis => {
                        let value = value.to_string();
                        if let Err(e) = sender.send(&value) {
                            return transcript.finish(HandshakeVerdict::SendFailed { reason: e.to_string() });
                        }
                        transcript.events.push(TranscriptEvent::ValueSent { axis, value });
                        break;
                    }
                    LineShape::Prompt { axis: prompted } => {
                        return transcript.finish(HandshakeVerdict::WrongAxisOrder {
                            expected: axis,
                            received: prompted,
                        });
                    }
                    _ => {}
                }
            }
        }

        let deadline = Instant::now() + self.timings.ack_timeout;
        loop {
            match queue.pop_line() {
                Some(line) => {
                    let acknowledged = is_ack(&line);
                    transcript.events.push(TranscriptEvent::Received { line });
                    if acknowledged {
                        return transcript.finish(HandshakeVerdict::Success);
                    }
                }
                None => {
                    if Instant::now() >= deadline {
                        return transcript.finish(HandshakeVerdict::NoFinalAck);
                    }
                    sleep(self.timings.poll_interval).await;
                }
            }
        }
    }
}

impl fmt::Display for HandshakeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeVerdict::Success => write!(f, "SUCCESS"),
            HandshakeVerdict::NoCachedState => write!(f, "NO_CACHED_STATE"),
            HandshakeVerdict::SendFailed { .. } => write!(f, "SEND_FAILED"),
            HandshakeVerdict::WrongAxisOrder { .. } => write!(f, "WRONG_AXIS_ORDER"),
            HandshakeVerdict::PromptTimeout { .. } => write!(f, "PROMPT_TIMEOUT"),
            HandshakeVerdict::NoFinalAck => write!(f, "NO_FINAL_ACK"),
        }
    }
}

impl fmt::Display for HandshakeTranscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[HANDSHAKE for '{}']: {}", self.command, self.verdict)?;
        for event in &self.events {
            match event {
                TranscriptEvent::CommandSent { command } => write!(f, "\n  --> {}", command)?,
                TranscriptEvent::Received { line } => write!(f, "\n  <-- {}", line)?,
                TranscriptEvent::ValueSent { axis, value } => write!(f, "\n  --> {} (axis {})", value, axis)?,
            }
        }

        let note = match &self.verdict {
            HandshakeVerdict::Success => "All five axis values were accepted.".to_string(),
            HandshakeVerdict::NoCachedState => {
                "No cached joint position; query the current position first. Nothing was sent.".to_string()
            }
            HandshakeVerdict::SendFailed { reason } => format!("Serial write failed: {}.", reason),
            HandshakeVerdict::WrongAxisOrder { expected, received } => format!(
                "Expected a prompt for axis {} but the controller asked for axis {}; aborted.",
                expected, received
            ),
            HandshakeVerdict::PromptTimeout { axis } => {
                format!("No prompt for axis {} arrived in time; aborted.", axis)
            }
            HandshakeVerdict::NoFinalAck => {
                "All values were sent but the controller never answered OK.".to_string()
            }
        };
        write!(f, "\n[System Note: {}]", note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JointVector;
    use std::collections::VecDeque;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    /// Fake controller: each carriage-return terminated write releases the next scripted reply
    struct ScriptedDevice {
        queue: LineQueue,
        replies: VecDeque<Vec<&'static str>>,
        written: Arc<Mutex<Vec<String>>>,
        partial: Vec<u8>,
    }

    impl Write for ScriptedDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for &byte in buf {
                if byte == b'\r' {
                    let line = String::from_utf8_lossy(&self.partial).to_string();
                    self.partial.clear();
                    self.written.lock().unwrap().push(line);
                    for reply in self.replies.pop_front().unwrap_or_default() {
                        self.queue.push(reply.to_string());
                    }
                } else {
                    self.partial.push(byte);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted(queue: &LineQueue, replies: Vec<Vec<&'static str>>) -> (CommandSender, Arc<Mutex<Vec<String>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let device = ScriptedDevice {
            queue: queue.clone(),
            replies: replies.into(),
            written: written.clone(),
            partial: Vec::new(),
        };
        (CommandSender::new(Box::new(device)), written)
    }

    fn driver_with_cache() -> HandshakeDriver {
        let cache = RobotStateCache::new();
        cache.set(JointVector::new([10.0, 20.0, 30.0, 40.0, 50.0]));
        HandshakeDriver::new(HandshakeTimings::default(), LineGrammar::new().unwrap(), cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_handshake_succeeds() {
        let queue = LineQueue::new();
        let (mut sender, written) = scripted(
            &queue,
            vec![
                vec!["SETPV P1", "Enter Axis 1 value:"],
                vec!["Enter Axis 2 value:"],
                vec!["Enter Axis 3 value:"],
                vec!["Enter Axis 4 value:"],
                vec!["Enter Axis 5 value:"],
                vec!["OK"],
            ],
        );

        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert_eq!(transcript.verdict, HandshakeVerdict::Success);
        assert_eq!(transcript.sent_values(), vec!["10", "20", "30", "40", "50"]);
        assert_eq!(*written.lock().unwrap(), vec!["SETPV P1", "10", "20", "30", "40", "50"]);
        assert!(transcript.to_string().starts_with("[HANDSHAKE for 'SETPV P1']: SUCCESS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cached_state_sends_nothing() {
        let queue = LineQueue::new();
        let (mut sender, written) = scripted(&queue, vec![vec!["Enter Axis 1 value:"]]);
        let driver = HandshakeDriver::new(
            HandshakeTimings::default(),
            LineGrammar::new().unwrap(),
            RobotStateCache::new(),
        );

        let transcript = driver.run(&queue, &mut sender, "SETPV P1").await;

        assert_eq!(transcript.verdict, HandshakeVerdict::NoCachedState);
        assert!(transcript.events.is_empty());
        assert!(written.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_prompt_aborts_after_one_value() {
        let queue = LineQueue::new();
        let (mut sender, written) = scripted(
            &queue,
            vec![vec!["Enter Axis 1 value:"], vec!["Enter Axis 3 value:"]],
        );

        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert_eq!(
            transcript.verdict,
            HandshakeVerdict::WrongAxisOrder { expected: 2, received: 3 }
        );
        assert_eq!(transcript.sent_values(), vec!["10"]);
        assert_eq!(*written.lock().unwrap(), vec!["SETPV P1", "10"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_lines_are_logged_and_skipped() {
        let queue = LineQueue::new();
        let (mut sender, _) = scripted(
            &queue,
            vec![
                vec!["Working...", "Enter Axis 1 value:"],
                vec!["Axis 1 = 10 counts", "Enter Axis 2 value:"],
                vec!["Enter Axis 3 value:"],
                vec!["Enter Axis 4 value:"],
                vec!["Enter Axis 5 value:"],
                vec!["Done", "  ok  "],
            ],
        );

        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert!(transcript.verdict.is_success());
        assert!(transcript
            .events
            .contains(&TranscriptEvent::Received { line: "Working...".to_string() }));
        assert!(transcript
            .events
            .contains(&TranscriptEvent::Received { line: "Done".to_string() }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prompt_times_out() {
        let queue = LineQueue::new();
        let (mut sender, written) = scripted(
            &queue,
            vec![vec!["Enter Axis 1 value:"], vec!["Enter Axis 2 value:"], vec!["still thinking"]],
        );

        let started = Instant::now();
        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert_eq!(transcript.verdict, HandshakeVerdict::PromptTimeout { axis: 3 });
        assert_eq!(transcript.sent_values(), vec!["10", "20"]);
        assert_eq!(written.lock().unwrap().len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_fails() {
        let queue = LineQueue::new();
        let (mut sender, _) = scripted(
            &queue,
            vec![
                vec!["Enter Axis 1 value:"],
                vec!["Enter Axis 2 value:"],
                vec!["Enter Axis 3 value:"],
                vec!["Enter Axis 4 value:"],
                vec!["Enter Axis 5 value:"],
                vec!["OK?", "Done"],
            ],
        );

        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert_eq!(transcript.verdict, HandshakeVerdict::NoFinalAck);
        assert_eq!(transcript.sent_values().len(), 5);
        assert!(transcript.to_string().contains("never answered OK"));
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_aborts_immediately() {
        let queue = LineQueue::new();
        let mut sender = CommandSender::new(Box::new(BrokenWriter));

        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert!(matches!(transcript.verdict, HandshakeVerdict::SendFailed { .. }));
        assert!(transcript.events.is_empty());
    }

    /// Accepts the first write (and queues one prompt), then fails every later one
    struct FailsAfterCommand {
        queue: LineQueue,
        writes: usize,
    }

    impl Write for FailsAfterCommand {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            if self.writes > 1 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.queue.push("Enter Axis 1 value:".to_string());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_write_failure_aborts_handshake() {
        let queue = LineQueue::new();
        let mut sender = CommandSender::new(Box::new(FailsAfterCommand {
            queue: queue.clone(),
            writes: 0,
        }));

        let transcript = driver_with_cache().run(&queue, &mut sender, "SETPV P1").await;

        assert!(matches!(transcript.verdict, HandshakeVerdict::SendFailed { .. }));
        assert_eq!(
            transcript.events.first(),
            Some(&TranscriptEvent::CommandSent { command: "SETPV P1".to_string() })
        );
        assert!(transcript.sent_values().is_empty());
        assert!(transcript.to_string().contains("SEND_FAILED"));
    }
}
