//! Configuration loading for the ACL controller daemon

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use crate::{AclError, Result};

/// Default location of the daemon configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/default_config.yaml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub serial: Option<SerialConfig>,
    pub collector: Option<CollectorConfig>,
    pub handshake: Option<HandshakeConfig>,
    pub commands: Option<CommandsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// The controller resets when the port opens; wait this long before any I/O
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub overall_timeout_secs: f64,
    pub inter_message_timeout_secs: f64,
    pub poll_interval_ms: u64,
    pub marker_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub prompt_timeout_secs: f64,
    pub ack_timeout_secs: f64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Command whose reply lists all five axis counts
    pub telemetry_query: String,
    /// Command words whose single-argument form starts a value prompt sequence
    pub interactive_commands: Vec<String>,
    pub terminal_markers: Vec<TerminalMarkerConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TerminalMarkerConfig {
    pub command: String,
    pub marker: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 100,
            settle_ms: 2000,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: 90.0,
            inter_message_timeout_secs: 1.5,
            poll_interval_ms: 50,
            marker_grace_ms: 200,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            prompt_timeout_secs: 5.0,
            ack_timeout_secs: 5.0,
            poll_interval_ms: 50,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            telemetry_query: "LISTPV POSITION".to_string(),
            interactive_commands: vec!["SETPV".to_string()],
            terminal_markers: vec![TerminalMarkerConfig {
                command: "HOME".to_string(),
                marker: "Homing complete(robot)".to_string(),
            }],
        }
    }
}

impl DaemonConfig {
    /// Load configuration from an explicit path
    pub fn load_from_path(config_path: &str) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .map_err(|e| AclError::Config(format!("Failed to read {}: {}", config_path, e)))?;

        Self::from_yaml_str(&contents)
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: DaemonConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let collector = self.collector();
        check_timeout_secs("collector.overall_timeout_secs", collector.overall_timeout_secs)?;
        check_timeout_secs("collector.inter_message_timeout_secs", collector.inter_message_timeout_secs)?;
        check_poll_interval("collector.poll_interval_ms", collector.poll_interval_ms)?;

        let handshake = self.handshake();
        check_timeout_secs("handshake.prompt_timeout_secs", handshake.prompt_timeout_secs)?;
        check_timeout_secs("handshake.ack_timeout_secs", handshake.ack_timeout_secs)?;
        check_poll_interval("handshake.poll_interval_ms", handshake.poll_interval_ms)?;
        if self.commands().telemetry_query.trim().is_empty() {
            return Err(AclError::Config("commands.telemetry_query must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get serial configuration with defaults
    pub fn serial(&self) -> SerialConfig {
        self.serial.clone().unwrap_or_default()
    }

    /// Get response collector configuration with defaults
    pub fn collector(&self) -> CollectorConfig {
        self.collector.clone().unwrap_or_default()
    }

    /// Get handshake configuration with defaults
    pub fn handshake(&self) -> HandshakeConfig {
        self.handshake.clone().unwrap_or_default()
    }

    /// Get command grammar configuration with defaults
    pub fn commands(&self) -> CommandsConfig {
        self.commands.clone().unwrap_or_default()
    }
}

/// Deadlines are computed as `Instant + Duration`; keep them well inside its range
const MAX_TIMEOUT_SECS: f64 = 86_400.0;

fn check_timeout_secs(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > MAX_TIMEOUT_SECS {
        return Err(AclError::Config(format!(
            "{} must be a positive number of seconds no greater than {}, got {}",
            name, MAX_TIMEOUT_SECS, value
        )));
    }
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .map_err(|e| AclError::Config(format!("{}: {}", name, e)))
}

fn check_poll_interval(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(AclError::Config(format!("{} must be at least 1", name)));
    }
    Ok(())
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl CollectorConfig {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.overall_timeout_secs)
    }

    pub fn inter_message_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.inter_message_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn marker_grace(&self) -> Duration {
        Duration::from_millis(self.marker_grace_ms)
    }
}

impl HandshakeConfig {
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.prompt_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::from_yaml_str("{}").unwrap();

        assert_eq!(config.serial().baud_rate, 9600);
        assert_eq!(config.collector().overall_timeout(), Duration::from_secs(90));
        assert_eq!(config.collector().inter_message_timeout(), Duration::from_millis(1500));
        assert_eq!(config.collector().poll_interval(), Duration::from_millis(50));
        assert_eq!(config.handshake().prompt_timeout(), Duration::from_secs(5));
        assert_eq!(config.commands().telemetry_query, "LISTPV POSITION");
        assert_eq!(config.commands().terminal_markers[0].marker, "Homing complete(robot)");
    }

    #[test]
    fn test_partial_sections_keep_field_defaults() {
        let yaml = r#"
serial:
  port: /dev/ttyUSB0
collector:
  inter_message_timeout_secs: 0.5
commands:
  terminal_markers:
    - command: RUN DEMO
      marker: "Program complete."
"#;
        let config = DaemonConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.serial().port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial().baud_rate, 9600);
        assert_eq!(config.collector().inter_message_timeout(), Duration::from_millis(500));
        assert_eq!(config.collector().overall_timeout_secs, 90.0);
        assert_eq!(config.commands().interactive_commands, vec!["SETPV".to_string()]);
        assert_eq!(config.commands().terminal_markers.len(), 1);
        assert_eq!(config.commands().terminal_markers[0].command, "RUN DEMO");
    }

    #[test]
    fn test_rejects_non_positive_timeouts() {
        let yaml = "handshake:\n  prompt_timeout_secs: 0\n";
        assert!(matches!(DaemonConfig::from_yaml_str(yaml), Err(AclError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = DaemonConfig::load_from_path("config/does_not_exist.yaml");
        assert!(matches!(result, Err(AclError::Config(_))));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = DaemonConfig::load().unwrap();

        assert!(config.serial().port.is_none());
        assert_eq!(config.serial().settle_ms, SerialConfig::default().settle_ms);
        assert_eq!(config.collector().marker_grace_ms, 200);
        assert_eq!(config.commands().terminal_markers, CommandsConfig::default().terminal_markers);
    }

    #[test]
    fn test_rejects_non_finite_and_huge_timeouts() {
        for yaml in [
            "collector:\n  overall_timeout_secs: .inf\n",
            "collector:\n  inter_message_timeout_secs: .nan\n",
            "handshake:\n  prompt_timeout_secs: .nan\n",
            "handshake:\n  ack_timeout_secs: 1e20\n",
            "collector:\n  overall_timeout_secs: 1e18\n",
        ] {
            let result = DaemonConfig::from_yaml_str(yaml);
            assert!(matches!(result, Err(AclError::Config(_))), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        for yaml in [
            "collector:\n  poll_interval_ms: 0\n",
            "handshake:\n  poll_interval_ms: 0\n",
        ] {
            let result = DaemonConfig::from_yaml_str(yaml);
            assert!(matches!(result, Err(AclError::Config(_))), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_largest_allowed_timeout_converts() {
        let config = DaemonConfig::from_yaml_str("collector:\n  overall_timeout_secs: 86400\n").unwrap();
        assert_eq!(config.collector().overall_timeout(), Duration::from_secs(86_400));
    }
}
