//! Response collection with tiered timeouts
//!
//! After a command is sent, replies trickle in as separate lines with no
//! explicit end-of-response marker. The collector gathers them until a
//! command-specific terminal marker shows up or one of two timeouts fires.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use crate::config::CollectorConfig;
use crate::grammar::{CommandGrammar, CommandShape};
use crate::receiver::LineQueue;
use crate::state::RobotStateCache;
use crate::telemetry::TelemetryParser;

/// Why collection stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionReason {
    TerminalMarker,
    OverallTimeout,
    InterMessageTimeout,
    NoResponse,
}

/// Lines gathered for one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    pub lines: Vec<String>,
    pub completion_reason: CompletionReason,
    /// Marker that ended collection, for `TerminalMarker`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    /// Telemetry parse result; only set for telemetry queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_parsed: Option<bool>,
    pub elapsed_secs: f64,
}

/// Tiered timeouts applied while waiting for a reply
#[derive(Debug, Clone, Copy)]
pub struct CollectorTimings {
    pub overall_timeout: Duration,
    pub inter_message_timeout: Duration,
    pub poll_interval: Duration,
    pub marker_grace: Duration,
}

impl From<&CollectorConfig> for CollectorTimings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            overall_timeout: config.overall_timeout(),
            inter_message_timeout: config.inter_message_timeout(),
            poll_interval: config.poll_interval(),
            marker_grace: config.marker_grace(),
        }
    }
}

impl Default for CollectorTimings {
    fn default() -> Self {
        Self::from(&CollectorConfig::default())
    }
}

pub struct ResponseCollector {
    timings: CollectorTimings,
    grammar: CommandGrammar,
    parser: TelemetryParser,
}

impl ResponseCollector {
    pub fn new(timings: CollectorTimings, grammar: CommandGrammar, cache: RobotStateCache) -> Self {
        let parser = TelemetryParser::new(grammar.lines().clone(), cache);
        Self { timings, grammar, parser }
    }

    /// Gather the reply to an already-sent command
    pub async fn collect(&self, queue: &LineQueue, command: &str) -> CommandResponse {
        let shape = self.grammar.shape(command);
        let marker = match &shape {
            CommandShape::Terminal { marker } => Some(marker.as_str()),
            _ => None,
        };

        debug!(
            "Waiting for response to '{}' (max {:?} total, {:?} between lines)",
            command, self.timings.overall_timeout, self.timings.inter_message_timeout
        );

        let start = Instant::now();
        let mut last_rx = start;
        let mut lines: Vec<String> = Vec::new();

        let completion_reason = loop {
            if start.elapsed() > self.timings.overall_timeout {
                break if lines.is_empty() {
                    CompletionReason::NoResponse
                } else {
                    CompletionReason::OverallTimeout
                };
            }

            match queue.pop_line() {
                Some(line) => {
                    let marker_hit = marker.is_some_and(|m| line.contains(m));
                    lines.push(line);
                    last_rx = Instant::now();

                    if marker_hit {
                        debug!("Terminal marker seen for '{}'", command);
                        // One trailing line (usually the OK) may follow right behind the marker
                        sleep(self.timings.marker_grace).await;
                        if let Some(trailing) = queue.pop_line() {
                            lines.push(trailing);
                        }
                        break CompletionReason::TerminalMarker;
                    }
                }
                None => {
                    if last_rx.elapsed() > self.timings.inter_message_timeout {
                        break if lines.is_empty() {
                            CompletionReason::NoResponse
                        } else {
                            CompletionReason::InterMessageTimeout
                        };
                    }
                    sleep(self.timings.poll_interval).await;
                }
            }
        };

        let telemetry_parsed = if shape == CommandShape::TelemetryQuery {
            Some(self.parser.parse(&lines))
        } else {
            None
        };

        let response = CommandResponse {
            command: command.to_string(),
            lines,
            completion_reason,
            marker: match completion_reason {
                CompletionReason::TerminalMarker => marker.map(str::to_string),
                _ => None,
            },
            telemetry_parsed,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };

        info!(
            "Collected {} line(s) for '{}' ({:?})",
            response.lines.len(), command, response.completion_reason
        );
        response
    }
}

impl CommandResponse {
    fn reason_note(&self) -> String {
        match self.completion_reason {
            CompletionReason::TerminalMarker => format!(
                "Response complete: terminal marker '{}' detected.",
                self.marker.as_deref().unwrap_or_default()
            ),
            CompletionReason::OverallTimeout => {
                "Overall response timeout reached during reception.".to_string()
            }
            CompletionReason::InterMessageTimeout => {
                "Stopped waiting for further lines due to inter-message timeout.".to_string()
            }
            CompletionReason::NoResponse => format!(
                "Sent '{}', but received no response within {:.1}s.",
                self.command, self.elapsed_secs
            ),
        }
    }
}

impl fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            write!(f, "[System Note: {}]", self.reason_note())?;
        } else {
            write!(f, "[SERIAL_RX for '{}']: {}", self.command, self.lines.join("\n"))?;
            write!(f, "\n[System Note: {}]", self.reason_note())?;
        }

        match self.telemetry_parsed {
            Some(true) => write!(f, "\n[System Note: Joint position parsed and cached.]")?,
            Some(false) => write!(
                f,
                "\n[System Note: Could not parse all five axis values; cached position unchanged.]"
            )?,
            None => {}
        }
        Ok(())
    }
}
