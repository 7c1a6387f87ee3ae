//! Error types for the hostlink agent.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Failed to load config: {0}")]
    ConfigLoad(String),

    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    // Bus errors
    #[error("Failed to connect to bus: {0}")]
    BusConnect(String),

    #[error("Failed to queue publish to {subject}: {reason}")]
    PublishQueue { subject: String, reason: String },

    #[error("Failed to subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Drain timeout after {0:?}")]
    DrainTimeout(Duration),

    // Metrics errors
    #[error("Metrics scrape failed: {0}")]
    Scrape(String),

    #[error("Failed to decode metrics: {0}")]
    MetricsDecode(String),

    #[error("Invalid metrics: {0}")]
    MetricsInvalid(String),

    // Request validation errors
    #[error("{0}")]
    Validation(String),

    #[error("service not in allowed list: {0}")]
    ServiceNotAllowed(String),

    #[error("log path not in allowed list: {0}")]
    LogPathNotAllowed(String),

    #[error("command not in allowed list or scripts directory")]
    CommandNotAllowed,

    #[error("invalid action: {0} (must be start, stop, or restart)")]
    InvalidServiceAction(String),

    // Service manager errors
    #[error("failed to connect to service manager: {0}")]
    ServiceManagerConnect(String),

    #[error("failed to open service {name}: {reason}")]
    ServiceOpen { name: String, reason: String },

    #[error("failed to start service: {0}")]
    ServiceStart(String),

    #[error("failed to stop service: {0}")]
    ServiceStop(String),

    #[error("timeout waiting for service {name} to reach {state}")]
    ServiceStateTimeout { name: String, state: String },

    // Command execution errors
    #[error("failed to execute command: {0}")]
    CommandSpawn(String),

    #[error("command exited with code {exit_code}")]
    CommandExit { exit_code: i32, output: String },

    #[error("command execution timeout ({0:?})")]
    CommandTimeout(Duration),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_errors_match_wire_messages() {
        let err = Error::ServiceNotAllowed("AppX".to_string());
        assert_eq!(err.to_string(), "service not in allowed list: AppX");

        let err = Error::LogPathNotAllowed("C:\\evil.log".to_string());
        assert_eq!(err.to_string(), "log path not in allowed list: C:\\evil.log");
    }

    #[test]
    fn command_timeout_formats_duration() {
        let err = Error::CommandTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "command execution timeout (30s)");
    }
}
