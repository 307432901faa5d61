//! ACL Daemon - serial mediator for ACL robot controllers
//!
//! Sits between a command source and a robot controller that speaks a
//! line-oriented ASCII protocol over a serial link. Each command is sent,
//! its reply collected until a terminal marker or a timeout, and position
//! telemetry is cached so interactive position programming can answer the
//! controller's per-axis prompts.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use acld::{simulator, CommandOutcome, DaemonConfig, DeviceController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut controller = DeviceController::connect(DaemonConfig::default(), simulator::connect())?;
//!
//!     let query = controller.request("LISTPV POSITION");
//!     let outcome = controller.execute(&query).await;
//!     println!("{}", outcome);
//!
//!     let program = controller.request("SETPV P1");
//!     if let CommandOutcome::Handshake(transcript) = controller.execute(&program).await {
//!         println!("{}", transcript.verdict);
//!     }
//!
//!     controller.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **LineReceiver**: background thread turning serial bytes into lines
//! - **ResponseCollector**: decides when a command's reply is complete
//! - **TelemetryParser**: extracts the five axis counts into the state cache
//! - **HandshakeDriver**: answers per-axis value prompts from the cache
//! - **DeviceController**: sequences one command at a time over a connection
//! - **CommandStream**: stdin front end with text or JSON summaries

pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod grammar;
pub mod handshake;
pub mod json_output;
pub mod receiver;
pub mod simulator;
pub mod state;
pub mod stream;
pub mod telemetry;
pub mod transport;

pub use error::{AclError, Result};
pub use config::{DaemonConfig, SerialConfig, CollectorConfig, HandshakeConfig, CommandsConfig};
pub use controller::{DeviceController, CommandRequest, CommandOutcome, LinkState};
pub use collector::{ResponseCollector, CommandResponse, CompletionReason, CollectorTimings};
pub use handshake::{HandshakeDriver, HandshakeTranscript, HandshakeVerdict, TranscriptEvent};
pub use receiver::{LineQueue, LineReceiver};
pub use state::{JointVector, RobotStateCache, AXIS_COUNT};
pub use telemetry::TelemetryParser;
pub use grammar::{LineGrammar, CommandGrammar, LineShape, CommandShape};
pub use transport::{CommandSender, TransportHandles};
pub use stream::{CommandStream, OutputFormat};
pub use json_output::{CommandResultEvent, StatusEvent, BufferEvent, ErrorEvent};
