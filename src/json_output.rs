//! JSON Output for Command Results
//!
//! Structured events for command outcomes, session status and errors, one
//! JSON object per line on stdout, for consumption by external tools.

use serde::{Deserialize, Serialize};
use crate::controller::{CommandOutcome, LinkState};
use crate::state::JointVector;

/// Get current timestamp as f64 seconds since UNIX epoch with consistent precision
pub fn current_timestamp() -> f64 {
    let micros = chrono::Utc::now().timestamp_micros();
    micros as f64 / 1_000_000.0
}

/// Outcome of one command, with its rendered summary
#[derive(Debug, Clone, Serialize)]
pub struct CommandResultEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
    /// Same text the plain-text output would print
    pub summary: String,
}

/// Session status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub link_state: LinkState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_joints: Option<JointVector>,
    pub queued_lines: usize,
    pub commands_processed: u32,
}

/// Lines currently waiting in the receive queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub lines: Vec<String>,
}

/// Error event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub error: String,
}

impl CommandResultEvent {
    pub fn new(outcome: &CommandOutcome) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "command_result".to_string(),
            summary: outcome.to_string(),
            outcome: outcome.clone(),
        }
    }
}

impl StatusEvent {
    pub fn new(
        link_state: LinkState,
        cached_joints: Option<JointVector>,
        queued_lines: usize,
        commands_processed: u32,
    ) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "status".to_string(),
            link_state,
            cached_joints,
            queued_lines,
            commands_processed,
        }
    }
}

impl BufferEvent {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "buffer".to_string(),
            lines,
        }
    }
}

impl ErrorEvent {
    pub fn new(error: &str, command: Option<&str>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "error".to_string(),
            command: command.map(str::to_string),
            error: error.to_string(),
        }
    }
}

/// Output a JSON event to stdout
pub fn output_event<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{}", json);
    }
}

/// Convenience functions for outputting specific event types
pub mod output {
    use super::*;

    pub fn command_result(outcome: &CommandOutcome) {
        output_event(&CommandResultEvent::new(outcome));
    }

    pub fn status(event: StatusEvent) {
        output_event(&event);
    }

    pub fn buffer(lines: Vec<String>) {
        output_event(&BufferEvent::new(lines));
    }

    pub fn error(error: &str, command: Option<&str>) {
        output_event(&ErrorEvent::new(error, command));
    }
}
