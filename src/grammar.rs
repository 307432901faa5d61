//! Response and command grammar
//!
//! Maps outgoing command text to a [`CommandShape`] and incoming device
//! lines to a [`LineShape`]. All text matching used by the collector, the
//! telemetry parser and the handshake driver goes through here.

use regex::Regex;
use crate::config::{CommandsConfig, TerminalMarkerConfig};
use crate::Result;

/// Recognized shape of a single line received from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum LineShape {
    /// `Axis <N> = <value> counts`; `value` is `None` when the number is malformed
    Telemetry { axis: u32, value: Option<f64> },
    /// `Enter Axis <N> value:`
    Prompt { axis: u32 },
    /// Exact `OK` line
    Ack,
    Other,
}

/// Recognized shape of an outgoing command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandShape {
    TelemetryQuery,
    Interactive,
    Terminal { marker: String },
    Generic,
}

/// Line-level grammar for device output
#[derive(Debug, Clone)]
pub struct LineGrammar {
    telemetry_pattern: Regex,
    prompt_pattern: Regex,
}

impl LineGrammar {
    pub fn new() -> Result<Self> {
        Ok(Self {
            telemetry_pattern: Regex::new(r"(?i)axis\s+(\d+)\s*=\s*([-+]?[0-9.]+)\s+counts")?,
            prompt_pattern: Regex::new(r"(?i)enter\s+axis\s+(\d+)\s+value\s*:")?,
        })
    }

    /// Classify a line by the first shape it matches
    pub fn classify(&self, line: &str) -> LineShape {
        if is_ack(line) {
            return LineShape::Ack;
        }
        if let Some(axis) = self.prompt_axis(line) {
            return LineShape::Prompt { axis };
        }
        if let Some((axis, value)) = self.telemetry_readings(line).next() {
            return LineShape::Telemetry { axis, value };
        }
        LineShape::Other
    }

    /// Every axis reading on a line, in order of appearance
    pub fn telemetry_readings<'a>(&'a self, line: &'a str) -> impl Iterator<Item = (u32, Option<f64>)> + 'a {
        self.telemetry_pattern.captures_iter(line).filter_map(|caps| {
            let axis = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let value = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
            Some((axis, value))
        })
    }

    fn prompt_axis(&self, line: &str) -> Option<u32> {
        let caps = self.prompt_pattern.captures(line)?;
        // An axis number too large to parse still is a prompt, just never the expected one
        Some(caps.get(1)?.as_str().parse::<u32>().unwrap_or(u32::MAX))
    }
}

/// True when the trimmed line is exactly `OK`, ignoring case
pub fn is_ack(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("OK")
}

/// Command-level grammar: which outgoing commands get special handling
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    telemetry_query: String,
    interactive_commands: Vec<String>,
    terminal_markers: Vec<TerminalMarkerConfig>,
    lines: LineGrammar,
}

impl CommandGrammar {
    pub fn from_config(config: &CommandsConfig) -> Result<Self> {
        Ok(Self {
            telemetry_query: normalize(&config.telemetry_query),
            interactive_commands: config.interactive_commands.iter().map(|c| normalize(c)).collect(),
            terminal_markers: config
                .terminal_markers
                .iter()
                .map(|m| TerminalMarkerConfig {
                    command: normalize(&m.command),
                    marker: m.marker.clone(),
                })
                .collect(),
            lines: LineGrammar::new()?,
        })
    }

    pub fn lines(&self) -> &LineGrammar {
        &self.lines
    }

    /// Classify an outgoing command
    pub fn shape(&self, command: &str) -> CommandShape {
        let normalized = normalize(command);

        if normalized == self.telemetry_query {
            return CommandShape::TelemetryQuery;
        }

        let words: Vec<&str> = normalized.split(' ').collect();
        if words.len() == 2 && self.interactive_commands.iter().any(|c| c == words[0]) {
            return CommandShape::Interactive;
        }

        if let Some(marker) = self.terminal_markers.iter().find(|m| m.command == normalized) {
            return CommandShape::Terminal { marker: marker.marker.clone() };
        }

        CommandShape::Generic
    }
}

/// Uppercase and collapse runs of whitespace
fn normalize(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}
