//! Wire messages: telemetry payloads and command request/reply payloads.
//!
//! Everything is JSON on the bus and carries an RFC 3339 UTC `timestamp`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current time as an RFC 3339 UTC string, the wire timestamp format.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// Telemetry payloads

/// Liveness heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: String,
    pub version: String,
}

impl Heartbeat {
    pub fn new(version: &str) -> Self {
        Self {
            timestamp: rfc3339_now(),
            version: version.to_string(),
        }
    }
}

/// System metrics extracted from the exporter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f64,
    pub memory_free_gb: f64,
    pub disk_free_percent: f64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub timestamp: String,
}

/// Error variant published on a telemetry subject when collection fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryError {
    pub status: String,
    pub error: String,
    pub timestamp: String,
}

impl TelemetryError {
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            status: "error".to_string(),
            error: error.to_string(),
            timestamp: rfc3339_now(),
        }
    }
}

/// Lifecycle state of an OS service, as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Unknown,
    Error,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::StartPending => "StartPending",
            ServiceState::StopPending => "StopPending",
            ServiceState::Running => "Running",
            ServiceState::ContinuePending => "ContinuePending",
            ServiceState::PausePending => "PausePending",
            ServiceState::Paused => "Paused",
            ServiceState::Unknown => "Unknown",
            ServiceState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// One service's status within a service check report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
}

/// Service check telemetry payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusReport {
    pub services: Vec<ServiceStatus>,
    pub timestamp: String,
}

/// Full system inventory snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub os: OsFacts,
    pub cpu: CpuFacts,
    pub memory: MemoryFacts,
    pub disks: Vec<DiskFacts>,
    pub network: NetworkFacts,
    pub agent: AgentFacts,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsFacts {
    pub name: String,
    pub version: String,
    pub build: String,
    pub platform: String,
}

impl Default for OsFacts {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            version: "Unknown".to_string(),
            build: "Unknown".to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuFacts {
    pub cores: usize,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFacts {
    pub total_gb: f64,
    pub available_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskFacts {
    pub drive: String,
    pub total_gb: f64,
    pub free_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFacts {
    pub primary_ip: String,
}

impl Default for NetworkFacts {
    fn default() -> Self {
        Self {
            primary_ip: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFacts {
    pub version: String,
}

// Command request/reply payloads

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub status: String,
    pub timestamp: String,
}

impl PingReply {
    pub fn pong() -> Self {
        Self {
            status: "pong".to_string(),
            timestamp: rfc3339_now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceControlRequest {
    pub action: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceControlReply {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFetchRequest {
    pub log_path: String,
    pub lines: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFetchReply {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecReply {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Raw JSON when the command output parses as JSON, a JSON string otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

/// Generic error reply used when a request cannot be decoded or a handler
/// fails before producing a typed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub status: String,
    pub error: String,
    pub timestamp: String,
}

impl ErrorReply {
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            status: "error".to_string(),
            error: error.to_string(),
            timestamp: rfc3339_now(),
        }
    }
}

// Health reply

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReply {
    pub status: String,
    pub timestamp: String,
    pub agent: AgentHealth,
    pub nats: BusHealth,
    pub tasks: TaskHealthMetrics,
    pub config: ConfigSummary,
    pub os: OsFacts,
}

/// Process-level counters for the health reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub version: String,
    pub uptime_seconds: u64,
    pub commands_processed: u64,
    pub commands_errored: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<String>,
}

/// Bus connection view for the health reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub reconnects: u64,
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
}

/// Scheduled task counters for the health reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskHealthMetrics {
    pub heartbeat_count: u64,
    pub metrics_count: u64,
    pub metrics_failures: u64,
    pub service_check_count: u64,
    pub inventory_count: u64,
    pub skipped_ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_metrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_service_check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_inventory: Option<String>,
}

/// Configuration summary for the health reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub device_id: String,
    pub subject_prefix: String,
    pub version: String,
    pub enabled_tasks: Vec<String>,
}
