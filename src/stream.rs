//! Command Streaming for the ACL Controller
//!
//! Reads newline-delimited commands from stdin, runs them one at a time on
//! the [`DeviceController`] and prints one annotated summary per command.
//! Lines starting with `@` are local sentinel commands and never reach the
//! device.

use anyhow::Result;
use clap::ValueEnum;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};
use crate::controller::{CommandOutcome, CommandRequest, DeviceController};
use crate::json_output::{self, StatusEvent};

/// How many queued lines `@view` shows
const VIEW_LINE_LIMIT: usize = 15;

/// Summary output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Local commands handled by the stream itself
#[derive(Debug, Clone, PartialEq)]
pub enum Sentinel {
    View,
    State,
    Status,
    Raw(String),
    Teach(String),
    Help,
    Quit,
    Unknown(String),
}

impl Sentinel {
    /// Parse the text following `@`
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (name, rest) = match text.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (text, ""),
        };

        match (name.to_lowercase().as_str(), rest) {
            ("view", _) => Sentinel::View,
            ("state", _) => Sentinel::State,
            ("status", _) => Sentinel::Status,
            ("raw", cmd) if !cmd.is_empty() => Sentinel::Raw(cmd.to_string()),
            ("teach", cmd) if !cmd.is_empty() => Sentinel::Teach(cmd.to_string()),
            ("help", _) => Sentinel::Help,
            ("quit" | "exit", _) => Sentinel::Quit,
            _ => Sentinel::Unknown(text.to_string()),
        }
    }
}

/// Command streaming processor that reads from stdin and executes commands
pub struct CommandStream {
    controller: DeviceController,
    format: OutputFormat,
    command_count: u32,
}

impl CommandStream {
    pub fn new(controller: DeviceController, format: OutputFormat) -> Self {
        Self {
            controller,
            format,
            command_count: 0,
        }
    }

    /// Main command processing loop
    ///
    /// Stray device output is drained before every read so it cannot be
    /// mistaken for the next command's reply. Ctrl+C or SIGTERM end the loop
    /// once the command in flight has finished.
    pub async fn run(&mut self) -> Result<()> {
        info!("Command streaming active - enter ACL commands, @help for local commands");

        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut buffer = String::new();

        let shutdown = Self::setup_shutdown_handler();
        tokio::pin!(shutdown);

        loop {
            self.controller.drain_stray_lines();
            buffer.clear();

            tokio::select! {
                line_result = reader.read_line(&mut buffer) => {
                    match line_result {
                        Ok(0) => {
                            info!("End of input reached");
                            break;
                        }
                        Ok(_) => {
                            let command = buffer.trim().to_string();

                            // Skip empty lines and comment lines
                            if command.is_empty() || command.starts_with('#') {
                                continue;
                            }

                            if let Some(sentinel) = command.strip_prefix('@') {
                                if !self.handle_sentinel_command(Sentinel::parse(sentinel)).await {
                                    break;
                                }
                            } else {
                                let request = self.controller.request(&command);
                                self.process_command(request).await;
                            }
                        }
                        Err(e) => {
                            error!("Failed to read from stdin: {}", e);
                            break;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Set up signal handlers for graceful shutdown
    async fn setup_shutdown_handler() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    /// Execute one device command and report its outcome
    pub async fn process_command(&mut self, request: CommandRequest) -> CommandOutcome {
        let outcome = self.controller.execute(&request).await;
        self.command_count += 1;
        self.report(&outcome);
        outcome
    }

    fn report(&self, outcome: &CommandOutcome) {
        match self.format {
            OutputFormat::Text => println!("{}", outcome),
            OutputFormat::Json => json_output::output::command_result(outcome),
        }
    }

    /// Handle an @-sentinel; returns false when the stream should stop
    async fn handle_sentinel_command(&mut self, sentinel: Sentinel) -> bool {
        match sentinel {
            Sentinel::View => {
                let lines = self.controller.buffer_snapshot();
                let start = lines.len().saturating_sub(VIEW_LINE_LIMIT);
                let recent = lines[start..].to_vec();
                match self.format {
                    OutputFormat::Json => json_output::output::buffer(recent),
                    OutputFormat::Text if recent.is_empty() => {
                        println!("(receive buffer is empty)");
                    }
                    OutputFormat::Text => {
                        for line in recent {
                            println!("  {}", line);
                        }
                    }
                }
            }
            Sentinel::State | Sentinel::Status => {
                let event = StatusEvent::new(
                    self.controller.link_state(),
                    self.controller.cached_joints(),
                    self.controller.buffer_snapshot().len(),
                    self.command_count,
                );
                match (self.format, &sentinel) {
                    (OutputFormat::Text, Sentinel::State) => match event.cached_joints {
                        Some(joints) => println!("Cached joint position: {}", joints),
                        None => println!("No joint position cached yet"),
                    },
                    _ => json_output::output::status(event),
                }
            }
            Sentinel::Raw(command) => {
                if let Err(e) = self.controller.send_raw(&command) {
                    error!("Raw send failed: {}", e);
                    self.report_error(&e.to_string(), Some(&command));
                }
            }
            Sentinel::Teach(command) => {
                self.process_command(CommandRequest::interactive(&command)).await;
            }
            Sentinel::Help => {
                println!("Local commands:");
                println!("  @view          show recent unconsumed lines from the device");
                println!("  @state         show the cached joint position");
                println!("  @status        show session status as JSON");
                println!("  @raw <cmd>     send a command without waiting for its reply");
                println!("  @teach <cmd>   run <cmd> as an interactive position handshake");
                println!("  @quit          exit");
            }
            Sentinel::Quit => return false,
            Sentinel::Unknown(text) => {
                error!("Unknown sentinel command: @{}", text);
                self.report_error(&format!("Unknown sentinel command: @{}", text), None);
            }
        }
        true
    }

    fn report_error(&self, message: &str, command: Option<&str>) {
        match self.format {
            OutputFormat::Text => println!("[System Note: {}]", message),
            OutputFormat::Json => json_output::output::error(message, command),
        }
    }

    /// Graceful shutdown of command stream
    pub fn shutdown(&mut self) {
        info!("Shutting down command stream after {} command(s)", self.command_count);
        self.controller.shutdown();
    }
}
