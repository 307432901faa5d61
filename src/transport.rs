//! Serial transport and command sender
//!
//! The controller speaks plain ASCII lines. Commands go out terminated by a
//! single carriage return; replies are read by the
//! [`LineReceiver`](crate::receiver::LineReceiver) on its own handle.

use serialport::{ClearBuffer, FlowControl, SerialPort};
use std::io::{self, Read, Write};
use tracing::{error, info};
use crate::config::SerialConfig;
use crate::{AclError, Result};

/// Terminator appended to every device-bound command
pub const COMMAND_TERMINATOR: &[u8] = b"\r";

/// Independent read and write halves of one connection
pub struct TransportHandles {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

struct SerialHalf(Box<dyn SerialPort>);

impl Read for SerialHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Names of the serial ports visible on this machine
pub fn list_ports() -> Result<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// Open the configured serial port and split it into reader and writer halves
pub fn open_serial(config: &SerialConfig) -> Result<TransportHandles> {
    let port_name = config
        .port
        .as_deref()
        .ok_or_else(|| AclError::Config("No serial port configured".to_string()))?;

    info!("Opening serial port {} at {} baud", port_name, config.baud_rate);
    let port = serialport::new(port_name, config.baud_rate)
        .timeout(config.read_timeout())
        .flow_control(FlowControl::None)
        .open()
        .map_err(|e| AclError::Connection(format!("Failed to open {}: {}", port_name, e)))?;

    // Opening the port resets the controller; give it time before any I/O
    std::thread::sleep(config.settle_time());
    port.clear(ClearBuffer::All)?;

    let reader = port.try_clone()?;
    info!("Connected to {} at {} baud", port_name, config.baud_rate);

    Ok(TransportHandles {
        reader: Box::new(SerialHalf(reader)),
        writer: Box::new(SerialHalf(port)),
    })
}

/// Writes commands and prompt values to the controller
pub struct CommandSender {
    writer: Option<Box<dyn Write + Send>>,
}

impl CommandSender {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer: Some(writer) }
    }

    /// Send one line, appending the carriage-return terminator
    pub fn send(&mut self, text: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(AclError::NotConnected)?;

        let mut bytes = Vec::with_capacity(text.len() + COMMAND_TERMINATOR.len());
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(COMMAND_TERMINATOR);

        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| {
                error!("Failed to send '{}': {}", text, e);
                AclError::TransportWrite(e.to_string())
            })?;

        info!("--> [TX] {}", text);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Release the write handle; later sends fail with `NotConnected`
    pub fn close(&mut self) {
        if self.writer.take().is_some() {
            info!("Transport closed");
        }
    }
}
