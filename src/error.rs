//! Error types for ACL controller operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AclError>;

#[derive(Error, Debug)]
pub enum AclError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport write failed: {0}")]
    TransportWrite(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Response grammar error: {0}")]
    Grammar(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}
