//! Agent configuration.
//!
//! The configuration is an explicit record: every recognized key is a field,
//! unknown keys fail the load. Values are read once at startup and are
//! read-only afterwards.

use crate::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Device identifier, used as a bus subject token.
    pub device_id: String,
    /// Subject prefix, e.g. `agents` or `region.dev.agents`.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Bus connection settings.
    pub nats: NatsSettings,
    /// Scheduled task settings.
    #[serde(default)]
    pub tasks: TasksConfig,
    /// Command gate settings.
    #[serde(default)]
    pub commands: CommandsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bus connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NatsSettings {
    /// Server URLs, in failover order.
    pub urls: Vec<String>,
    /// Authentication descriptor.
    #[serde(default)]
    pub auth: AuthConfig,
    /// TLS descriptor.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Maximum reconnect attempts. `None` retries forever.
    #[serde(default)]
    pub max_reconnects: Option<usize>,
    /// Wait between reconnect attempts.
    #[serde(default = "default_reconnect_wait", with = "humane_duration")]
    pub reconnect_wait: Duration,
    /// Budget for the graceful drain during shutdown.
    #[serde(default = "default_drain_timeout", with = "humane_duration")]
    pub drain_timeout: Duration,
}

/// Bus authentication descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// NATS credentials file.
    Creds { creds_file: PathBuf },
    /// Static token.
    Token { token: String },
    /// Username and password.
    UserPass { username: String, password: String },
    #[default]
    None,
}

/// TLS descriptor for the bus connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Client certificate (requires `key_file`).
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    /// Client private key (requires `cert_file`).
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// CA certificate for server verification.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

/// Scheduled task settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TasksConfig {
    pub heartbeat: HeartbeatConfig,
    pub system_metrics: SystemMetricsConfig,
    pub service_check: ServiceCheckConfig,
    pub inventory: InventoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    #[serde(with = "humane_duration")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SystemMetricsConfig {
    pub enabled: bool,
    #[serde(with = "humane_duration")]
    pub interval: Duration,
    /// Prometheus-format exporter endpoint.
    pub exporter_url: String,
    /// Volume label used for disk metrics.
    pub volume: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceCheckConfig {
    pub enabled: bool,
    #[serde(with = "humane_duration")]
    pub interval: Duration,
    /// Services whose status is reported.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InventoryConfig {
    pub enabled: bool,
    #[serde(with = "humane_duration")]
    pub interval: Duration,
}

/// Command gate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CommandsConfig {
    /// Directory containing allowed scripts. Unset disables script execution.
    pub scripts_directory: Option<PathBuf>,
    /// Services that may be controlled remotely.
    pub allowed_services: Vec<String>,
    /// Commands that may be executed remotely (exact match).
    pub allowed_commands: Vec<String>,
    /// Glob patterns for log files that may be tailed.
    pub allowed_log_paths: Vec<String>,
    /// Subprocess execution timeout.
    #[serde(default = "default_command_timeout", with = "humane_duration")]
    pub timeout: Duration,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log file path; rotated files are written next to it.
    pub file: PathBuf,
    pub max_size_mb: u32,
    pub max_backups: u32,
}

fn default_subject_prefix() -> String {
    "agents".to_string()
}

fn default_reconnect_wait() -> Duration {
    Duration::from_secs(2)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            exporter_url: "http://localhost:9182/metrics".to_string(),
            volume: "C:".to_string(),
        }
    }
}

impl Default for ServiceCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            services: vec![],
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(86400),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            scripts_directory: None,
            allowed_services: vec![],
            allowed_commands: vec![],
            allowed_log_paths: vec![],
            timeout: default_command_timeout(),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            system_metrics: SystemMetricsConfig::default(),
            service_check: ServiceCheckConfig::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: PathBuf::from("logs/hostlink-agent.log"),
            max_size_mb: 100,
            max_backups: 3,
        }
    }
}

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const MIN_METRICS_INTERVAL: Duration = Duration::from_secs(30);
const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_SUBJECT_PREFIX_LEN: usize = 50;

impl Config {
    /// Load and validate the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("{}: {e}", path.display())))?;
        let config: Config =
            serde_yaml::from_str(&contents).map_err(|e| Error::ConfigLoad(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field formats, referenced files, and cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let device_id_re = Regex::new("^[A-Za-z0-9_-]+$").map_err(|e| Error::Internal(e.to_string()))?;
        if self.device_id.is_empty() {
            return Err(Error::ConfigInvalid("device_id is required".to_string()));
        }
        if !device_id_re.is_match(&self.device_id) {
            return Err(Error::ConfigInvalid(format!(
                "device_id must contain only alphanumeric characters, dashes, and underscores (got: {})",
                self.device_id
            )));
        }

        if self.subject_prefix.is_empty() {
            return Err(Error::ConfigInvalid("subject_prefix is required".to_string()));
        }
        if self.subject_prefix.len() > MAX_SUBJECT_PREFIX_LEN {
            return Err(Error::ConfigInvalid(format!(
                "subject_prefix must not exceed {MAX_SUBJECT_PREFIX_LEN} characters (got: {})",
                self.subject_prefix.len()
            )));
        }
        validate_subject_prefix(&self.subject_prefix)?;

        if self.nats.urls.is_empty() {
            return Err(Error::ConfigInvalid("at least one NATS URL is required".to_string()));
        }

        match &self.nats.auth {
            AuthConfig::Creds { creds_file } => {
                require_file(creds_file, "credentials file")?;
            }
            AuthConfig::Token { token } => {
                if token.is_empty() {
                    return Err(Error::ConfigInvalid("token is required for token auth type".to_string()));
                }
            }
            AuthConfig::UserPass { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(Error::ConfigInvalid(
                        "username and password are required for userpass auth type".to_string(),
                    ));
                }
            }
            AuthConfig::None => {}
        }

        if let Some(tls) = &self.nats.tls {
            if tls.enabled {
                match (&tls.cert_file, &tls.key_file) {
                    (Some(_), None) => {
                        return Err(Error::ConfigInvalid(
                            "tls.key_file is required when tls.cert_file is specified".to_string(),
                        ));
                    }
                    (None, Some(_)) => {
                        return Err(Error::ConfigInvalid(
                            "tls.cert_file is required when tls.key_file is specified".to_string(),
                        ));
                    }
                    _ => {}
                }
                for (file, what) in [
                    (&tls.cert_file, "TLS certificate file"),
                    (&tls.key_file, "TLS key file"),
                    (&tls.ca_file, "TLS CA file"),
                ] {
                    if let Some(path) = file {
                        require_file(path, what)?;
                    }
                }
            }
        }

        if let Some(dir) = &self.commands.scripts_directory {
            let meta = std::fs::metadata(dir).map_err(|e| {
                Error::ConfigInvalid(format!("scripts directory not found: {} ({e})", dir.display()))
            })?;
            if !meta.is_dir() {
                return Err(Error::ConfigInvalid(format!(
                    "scripts_directory must be a directory, not a file: {}",
                    dir.display()
                )));
            }
        }

        if self.tasks.service_check.enabled && self.tasks.service_check.services.is_empty() {
            return Err(Error::ConfigInvalid(
                "at least one service must be specified when service_check is enabled".to_string(),
            ));
        }

        if self.tasks.heartbeat.enabled && self.tasks.heartbeat.interval < MIN_HEARTBEAT_INTERVAL {
            return Err(Error::ConfigInvalid(format!(
                "heartbeat interval must be at least {MIN_HEARTBEAT_INTERVAL:?} (got: {:?})",
                self.tasks.heartbeat.interval
            )));
        }
        if self.tasks.system_metrics.enabled && self.tasks.system_metrics.interval < MIN_METRICS_INTERVAL {
            return Err(Error::ConfigInvalid(format!(
                "system_metrics interval must be at least {MIN_METRICS_INTERVAL:?} (got: {:?})",
                self.tasks.system_metrics.interval
            )));
        }
        if self.tasks.heartbeat.enabled
            && self.tasks.system_metrics.enabled
            && self.tasks.heartbeat.interval > self.tasks.system_metrics.interval
        {
            return Err(Error::ConfigInvalid(format!(
                "heartbeat interval ({:?}) must be less than or equal to metrics interval ({:?})",
                self.tasks.heartbeat.interval, self.tasks.system_metrics.interval
            )));
        }

        if self.commands.timeout < MIN_COMMAND_TIMEOUT || self.commands.timeout > MAX_COMMAND_TIMEOUT {
            return Err(Error::ConfigInvalid(format!(
                "command timeout must be between {MIN_COMMAND_TIMEOUT:?} and {MAX_COMMAND_TIMEOUT:?} (got: {:?})",
                self.commands.timeout
            )));
        }

        if !matches!(self.logging.level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(Error::ConfigInvalid(format!(
                "invalid log level: {} (must be debug, info, warn, or error)",
                self.logging.level
            )));
        }
        if self.logging.max_size_mb < 1 || self.logging.max_size_mb > 1000 {
            return Err(Error::ConfigInvalid(format!(
                "log max_size_mb must be between 1 and 1000 (got: {})",
                self.logging.max_size_mb
            )));
        }
        if self.logging.max_backups > 100 {
            return Err(Error::ConfigInvalid(format!(
                "log max_backups must be between 0 and 100 (got: {})",
                self.logging.max_backups
            )));
        }

        Ok(())
    }

    /// Names of the enabled scheduled tasks, for the health reply.
    pub fn enabled_tasks(&self) -> Vec<String> {
        let mut tasks = Vec::new();
        if self.tasks.heartbeat.enabled {
            tasks.push("heartbeat".to_string());
        }
        if self.tasks.system_metrics.enabled {
            tasks.push("system_metrics".to_string());
        }
        if self.tasks.service_check.enabled {
            tasks.push("service_check".to_string());
        }
        if self.tasks.inventory.enabled {
            tasks.push("inventory".to_string());
        }
        tasks
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if std::fs::metadata(path).is_err() {
        return Err(Error::ConfigInvalid(format!("{what} not found: {}", path.display())));
    }
    Ok(())
}

/// A subject prefix is dot-separated tokens of `[A-Za-z0-9_-]`.
fn validate_subject_prefix(prefix: &str) -> Result<()> {
    if prefix.starts_with('.') || prefix.ends_with('.') {
        return Err(Error::ConfigInvalid(format!(
            "invalid subject_prefix: cannot start or end with a dot (got: {prefix})"
        )));
    }
    for (i, token) in prefix.split('.').enumerate() {
        if token.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "invalid subject_prefix: empty token at position {i} (consecutive dots not allowed)"
            )));
        }
        if !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::ConfigInvalid(format!(
                "invalid subject_prefix: token '{token}' contains invalid characters"
            )));
        }
    }
    Ok(())
}

/// Serde adapter for durations written as `"500ms"`, `"30s"`, `"5m"`, `"24h"`.
pub mod humane_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration '{s}' is missing a unit (ms, s, m, h)"))?;
        let (num, unit) = s.split_at(split);
        let value: u64 = num.parse().map_err(|_| format!("invalid duration value: {s}"))?;
        match unit {
            "ms" => Ok(Duration::from_millis(value)),
            "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value * 60)),
            "h" => Ok(Duration::from_secs(value * 3600)),
            _ => Err(format!("unknown duration unit '{unit}' in '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            device_id: "host-1".to_string(),
            subject_prefix: "agents".to_string(),
            nats: NatsSettings {
                urls: vec!["nats://localhost:4222".to_string()],
                auth: AuthConfig::None,
                tls: None,
                max_reconnects: None,
                reconnect_wait: Duration::from_secs(2),
                drain_timeout: Duration::from_secs(30),
            },
            tasks: TasksConfig::default(),
            commands: CommandsConfig {
                timeout: Duration::from_secs(30),
                ..CommandsConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn device_id_rejects_invalid_characters() {
        let mut cfg = valid_config();
        cfg.device_id = "host.1".to_string();
        assert!(cfg.validate().is_err());

        cfg.device_id = "host 1".to_string();
        assert!(cfg.validate().is_err());

        cfg.device_id = "host_1-A".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn subject_prefix_allows_hierarchy() {
        let mut cfg = valid_config();
        cfg.subject_prefix = "region.dev.agents".to_string();
        assert!(cfg.validate().is_ok());

        cfg.subject_prefix = "region..agents".to_string();
        assert!(cfg.validate().is_err());

        cfg.subject_prefix = ".agents".to_string();
        assert!(cfg.validate().is_err());

        cfg.subject_prefix = "a".repeat(51);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn heartbeat_must_not_be_slower_than_metrics() {
        let mut cfg = valid_config();
        cfg.tasks.heartbeat.interval = Duration::from_secs(600);
        cfg.tasks.system_metrics.interval = Duration::from_secs(300);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn interval_minimums_enforced() {
        let mut cfg = valid_config();
        cfg.tasks.heartbeat.interval = Duration::from_secs(5);
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.tasks.system_metrics.interval = Duration::from_secs(20);
        assert!(cfg.validate().is_err());

        // Minimums only apply to enabled tasks.
        cfg.tasks.system_metrics.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn command_timeout_bounds() {
        let mut cfg = valid_config();
        cfg.commands.timeout = Duration::from_secs(2);
        assert!(cfg.validate().is_err());

        cfg.commands.timeout = Duration::from_secs(600);
        assert!(cfg.validate().is_err());

        cfg.commands.timeout = Duration::from_secs(300);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn service_check_requires_services() {
        let mut cfg = valid_config();
        cfg.tasks.service_check.enabled = true;
        assert!(cfg.validate().is_err());

        cfg.tasks.service_check.services = vec!["Spooler".to_string()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn auth_variants_validate() {
        let mut cfg = valid_config();
        cfg.nats.auth = AuthConfig::Token { token: String::new() };
        assert!(cfg.validate().is_err());

        cfg.nats.auth = AuthConfig::UserPass {
            username: "agent".to_string(),
            password: String::new(),
        };
        assert!(cfg.validate().is_err());

        cfg.nats.auth = AuthConfig::Creds {
            creds_file: PathBuf::from("/nonexistent/agent.creds"),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_keys_fail_closed() {
        let yaml = r#"
device_id: host-1
nats:
  urls: ["nats://localhost:4222"]
surprise_key: true
"#;
        let parsed: std::result::Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn yaml_round_trip_with_durations() {
        let yaml = r#"
device_id: host-1
subject_prefix: region.dev.agents
nats:
  urls: ["nats://a:4222", "nats://b:4222"]
  auth:
    type: userpass
    username: agent
    password: secret
  reconnect_wait: 2s
  drain_timeout: 45s
tasks:
  heartbeat:
    enabled: true
    interval: 30s
  system_metrics:
    enabled: true
    interval: 1m
    exporter_url: http://localhost:9182/metrics
    volume: "C:"
  service_check:
    enabled: true
    interval: 1m
    services: ["Spooler"]
  inventory:
    enabled: true
    interval: 24h
commands:
  allowed_services: ["Spooler"]
  allowed_commands: ["Get-Process | Sort"]
  allowed_log_paths: ["C:/logs/*.log"]
  timeout: 60s
logging:
  level: debug
  file: logs/agent.log
  max_size_mb: 50
  max_backups: 5
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.nats.drain_timeout, Duration::from_secs(45));
        assert_eq!(cfg.tasks.system_metrics.interval, Duration::from_secs(60));
        assert_eq!(cfg.tasks.inventory.interval, Duration::from_secs(86400));
        assert_eq!(cfg.enabled_tasks().len(), 4);
    }

    #[test]
    fn duration_parser_units() {
        assert_eq!(humane_duration::parse("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(humane_duration::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(humane_duration::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humane_duration::parse("24h").unwrap(), Duration::from_secs(86400));
        assert!(humane_duration::parse("30").is_err());
        assert!(humane_duration::parse("x5s").is_err());
    }
}
