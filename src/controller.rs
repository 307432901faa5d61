//! Device Controller for ACL Command Sessions
//!
//! Owns one connection to the controller and sequences everything on it:
//! draining stray output, sending commands, collecting replies, and running
//! interactive handshakes. Only one command is ever in flight.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use crate::{
    collector::{CollectorTimings, CommandResponse, ResponseCollector},
    config::DaemonConfig,
    grammar::{CommandGrammar, CommandShape},
    handshake::{HandshakeDriver, HandshakeTimings, HandshakeTranscript},
    receiver::{LineQueue, LineReceiver},
    state::{JointVector, RobotStateCache},
    transport::{CommandSender, TransportHandles},
    Result,
};

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connected,
    /// The receiver exited on its own; no further replies will arrive
    ReceiverStopped,
    Disconnected,
}

/// A command as handed over by the command source
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub text: String,
    pub interactive: bool,
}

impl CommandRequest {
    /// Derive the interactive flag from the command's shape
    pub fn classify(text: &str, grammar: &CommandGrammar) -> Self {
        Self {
            text: text.trim().to_string(),
            interactive: grammar.shape(text) == CommandShape::Interactive,
        }
    }

    /// Force handshake handling regardless of shape
    pub fn interactive(text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            interactive: true,
        }
    }
}

/// Result of one command, as reported back to the command source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutcome {
    Response(CommandResponse),
    Handshake(HandshakeTranscript),
    SendFailed { command: String, reason: String },
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Response(response) => write!(f, "{}", response),
            CommandOutcome::Handshake(transcript) => write!(f, "{}", transcript),
            CommandOutcome::SendFailed { command, reason } => write!(
                f,
                "[System Note: Failed to send the command '{}' due to a serial communication error: {}]",
                command, reason
            ),
        }
    }
}

pub struct DeviceController {
    grammar: CommandGrammar,
    queue: LineQueue,
    receiver: Option<LineReceiver>,
    sender: CommandSender,
    cache: RobotStateCache,
    collector: ResponseCollector,
    handshake: HandshakeDriver,
}

impl DeviceController {
    /// Start the receiver on `handles` and wire up the consumer side
    pub fn connect(config: DaemonConfig, handles: TransportHandles) -> Result<Self> {
        let grammar = CommandGrammar::from_config(&config.commands())?;
        let cache = RobotStateCache::new();
        let queue = LineQueue::new();

        let collector = ResponseCollector::new(
            CollectorTimings::from(&config.collector()),
            grammar.clone(),
            cache.clone(),
        );
        let handshake = HandshakeDriver::new(
            HandshakeTimings::from(&config.handshake()),
            grammar.lines().clone(),
            cache.clone(),
        );

        let receiver = LineReceiver::spawn(handles.reader, queue.clone())?;
        let sender = CommandSender::new(handles.writer);

        info!("Device controller ready");
        Ok(Self {
            grammar,
            queue,
            receiver: Some(receiver),
            sender,
            cache,
            collector,
            handshake,
        })
    }

    /// Build a request for `text` using this session's grammar
    pub fn request(&self, text: &str) -> CommandRequest {
        CommandRequest::classify(text, &self.grammar)
    }

    /// Discard anything the device sent since the last command
    pub fn drain_stray_lines(&self) -> usize {
        self.queue.drain()
    }

    /// Issue one command and wait for its outcome
    pub async fn execute(&mut self, request: &CommandRequest) -> CommandOutcome {
        if request.interactive {
            let transcript = self.handshake.run(&self.queue, &mut self.sender, &request.text).await;
            return CommandOutcome::Handshake(transcript);
        }

        if let Err(e) = self.sender.send(&request.text) {
            warn!("Failed to send '{}': {}", request.text, e);
            return CommandOutcome::SendFailed {
                command: request.text.clone(),
                reason: e.to_string(),
            };
        }

        CommandOutcome::Response(self.collector.collect(&self.queue, &request.text).await)
    }

    /// Write a command without waiting for its reply
    pub fn send_raw(&mut self, text: &str) -> Result<()> {
        self.sender.send(text)
    }

    /// Lines received but not yet consumed
    pub fn buffer_snapshot(&self) -> Vec<String> {
        self.queue.snapshot()
    }

    pub fn cached_joints(&self) -> Option<JointVector> {
        self.cache.get()
    }

    pub fn link_state(&self) -> LinkState {
        match &self.receiver {
            Some(receiver) if receiver.is_running() && self.sender.is_open() => LinkState::Connected,
            Some(_) => LinkState::ReceiverStopped,
            None => LinkState::Disconnected,
        }
    }

    /// Stop the receiver, wait for it, then close the transport
    pub fn shutdown(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            info!("Shutting down device controller");
            receiver.stop();
        }
        self.sender.close();
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CompletionReason;
    use crate::handshake::HandshakeVerdict;
    use crate::simulator;
    use std::time::Duration;

    fn fast_config() -> DaemonConfig {
        DaemonConfig::from_yaml_str(
            r#"
collector:
  inter_message_timeout_secs: 0.3
  overall_timeout_secs: 5
  poll_interval_ms: 10
  marker_grace_ms: 100
handshake:
  prompt_timeout_secs: 1
  ack_timeout_secs: 1
  poll_interval_ms: 10
"#,
        )
        .unwrap()
    }

    async fn settle(controller: &DeviceController) {
        // Let the receiver pick up the start-up banner
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.drain_stray_lines();
    }

    #[tokio::test]
    async fn test_query_then_program_position_end_to_end() {
        let mut controller = DeviceController::connect(fast_config(), simulator::connect()).unwrap();
        settle(&controller).await;

        let query = controller.request("LISTPV POSITION");
        assert!(!query.interactive);
        let outcome = controller.execute(&query).await;
        match &outcome {
            CommandOutcome::Response(response) => {
                assert_eq!(response.telemetry_parsed, Some(true));
                assert_eq!(response.completion_reason, CompletionReason::InterMessageTimeout);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            controller.cached_joints().unwrap().values(),
            [12345.0, -5678.0, 9012.0, 3456.0, -7890.0]
        );

        let program = controller.request("SETPV P1");
        assert!(program.interactive);
        match controller.execute(&program).await {
            CommandOutcome::Handshake(transcript) => {
                assert_eq!(transcript.verdict, HandshakeVerdict::Success);
                assert_eq!(transcript.sent_values(), vec!["12345", "-5678", "9012", "3456", "-7890"]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        controller.shutdown();
        assert_eq!(controller.link_state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_home_ends_on_marker() {
        let mut controller = DeviceController::connect(fast_config(), simulator::connect()).unwrap();
        settle(&controller).await;

        let outcome = controller.execute(&controller.request("home")).await;
        match outcome {
            CommandOutcome::Response(response) => {
                assert_eq!(response.completion_reason, CompletionReason::TerminalMarker);
                assert_eq!(response.lines.last().map(String::as_str), Some("OK"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_program_without_query_fails_cleanly() {
        let mut controller = DeviceController::connect(fast_config(), simulator::connect()).unwrap();
        settle(&controller).await;

        let outcome = controller.execute(&CommandRequest::interactive("SETPV P2")).await;
        match &outcome {
            CommandOutcome::Handshake(transcript) => {
                assert_eq!(transcript.verdict, HandshakeVerdict::NoCachedState);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(outcome.to_string().contains("NO_CACHED_STATE"));
    }

    #[tokio::test]
    async fn test_send_after_shutdown_reports_failure() {
        let mut controller = DeviceController::connect(fast_config(), simulator::connect()).unwrap();
        controller.shutdown();

        let outcome = controller.execute(&controller.request("SPEED 50")).await;
        assert!(matches!(outcome, CommandOutcome::SendFailed { .. }));
        assert!(outcome.to_string().starts_with("[System Note: Failed to send the command 'SPEED 50'"));
    }
}
