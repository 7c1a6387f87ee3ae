//! Command handler dispatch.
//!
//! Every request on a command subject produces exactly one reply: decode
//! failures reply with a generic error, handler panics are caught at the
//! dispatch boundary and answered with a synthetic error so the caller is
//! never left waiting.

use crate::executor::Executor;
use crate::scheduler::panic_message;
use futures::StreamExt;
use hostlink_core::Error;
use hostlink_core::config::Config;
use hostlink_core::messages::{
    BusHealth, ConfigSummary, ErrorReply, ExecReply, ExecRequest, HealthReply, LogFetchReply,
    LogFetchRequest, PingReply, ServiceControlReply, ServiceControlRequest, TaskHealthMetrics,
    rfc3339_now,
};
use hostlink_core::ports::BusStatus;
use hostlink_nats::BusClient;
use hostlink_probes::inventory;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The command families the agent answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    Service,
    Logs,
    Exec,
    Health,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Ping,
        CommandKind::Service,
        CommandKind::Logs,
        CommandKind::Exec,
        CommandKind::Health,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Ping => "ping",
            CommandKind::Service => "service",
            CommandKind::Logs => "logs",
            CommandKind::Exec => "exec",
            CommandKind::Health => "health",
        }
    }

    pub fn subject(self, prefix: &str, device_id: &str) -> String {
        format!("{prefix}.{device_id}.cmd.{}", self.name())
    }
}

/// Decodes requests, invokes the gate or probe, and encodes replies.
pub struct CommandHandlers {
    pub(crate) executor: Arc<Executor>,
    pub(crate) config: Arc<Config>,
    bus_status: Arc<dyn BusStatus>,
}

impl CommandHandlers {
    pub fn new(executor: Arc<Executor>, config: Arc<Config>, bus_status: Arc<dyn BusStatus>) -> Self {
        Self {
            executor,
            config,
            bus_status,
        }
    }

    /// Produce the reply bytes for one request.
    pub async fn route(&self, kind: CommandKind, payload: &[u8]) -> Vec<u8> {
        match kind {
            CommandKind::Ping => self.handle_ping(),
            CommandKind::Service => self.handle_service(payload).await,
            CommandKind::Logs => self.handle_logs(payload).await,
            CommandKind::Exec => self.handle_exec(payload).await,
            CommandKind::Health => self.handle_health(),
        }
    }

    fn handle_ping(&self) -> Vec<u8> {
        debug!("Received ping command");
        encode(&PingReply::pong())
    }

    async fn handle_service(&self, payload: &[u8]) -> Vec<u8> {
        let request: ServiceControlRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => return self.invalid_request("service control", e),
        };

        info!(
            action = %request.action,
            service = %request.service_name,
            "Processing service control"
        );

        match self
            .executor
            .control_service(&request.service_name, &request.action)
            .await
        {
            Ok(result) => {
                self.executor.command_stats().record_success();
                info!(service = %request.service_name, action = %request.action, "Service control succeeded");
                encode(&ServiceControlReply {
                    status: "success".to_string(),
                    service_name: Some(request.service_name),
                    action: Some(request.action),
                    result: Some(result),
                    error: None,
                    timestamp: rfc3339_now(),
                })
            }
            Err(e) => {
                error!(
                    error = %e,
                    service = %request.service_name,
                    action = %request.action,
                    "Service control failed"
                );
                self.executor.command_stats().record_error(&e);
                encode(&ServiceControlReply {
                    status: "error".to_string(),
                    service_name: None,
                    action: None,
                    result: None,
                    error: Some(e.to_string()),
                    timestamp: rfc3339_now(),
                })
            }
        }
    }

    async fn handle_logs(&self, payload: &[u8]) -> Vec<u8> {
        let request: LogFetchRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => return self.invalid_request("log fetch", e),
        };

        info!(path = %request.log_path, lines = request.lines, "Fetching log file");

        match self
            .executor
            .fetch_log_lines(&request.log_path, request.lines)
        {
            Ok(lines) => {
                self.executor.command_stats().record_success();
                info!(path = %request.log_path, lines = lines.len(), "Log fetch succeeded");
                encode(&LogFetchReply {
                    status: "success".to_string(),
                    log_path: Some(request.log_path),
                    total_lines: Some(lines.len()),
                    lines: Some(lines),
                    error: None,
                    timestamp: rfc3339_now(),
                })
            }
            Err(e) => {
                error!(error = %e, path = %request.log_path, "Log fetch failed");
                self.executor.command_stats().record_error(&e);
                encode(&LogFetchReply {
                    status: "error".to_string(),
                    log_path: None,
                    lines: None,
                    total_lines: None,
                    error: Some(e.to_string()),
                    timestamp: rfc3339_now(),
                })
            }
        }
    }

    async fn handle_exec(&self, payload: &[u8]) -> Vec<u8> {
        let request: ExecRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => return self.invalid_request("exec", e),
        };

        info!(command = %request.command, "Executing custom command");

        match self.executor.execute_command(&request.command).await {
            Ok(result) => {
                self.executor.command_stats().record_success();
                info!(command = %request.command, exit_code = result.exit_code, "Command execution succeeded");
                encode(&ExecReply {
                    status: "success".to_string(),
                    command: Some(request.command),
                    output: Some(encode_exec_output(&result.output)),
                    exit_code: Some(result.exit_code),
                    error: None,
                    timestamp: rfc3339_now(),
                })
            }
            Err(Error::CommandExit { exit_code, output }) => {
                let message = format!("command exited with code {exit_code}");
                error!(command = %request.command, exit_code, "Command execution failed");
                self.executor.command_stats().record_error(&message);
                encode(&ExecReply {
                    status: "error".to_string(),
                    command: Some(request.command),
                    output: Some(encode_exec_output(&output)),
                    exit_code: Some(exit_code),
                    error: Some(message),
                    timestamp: rfc3339_now(),
                })
            }
            Err(e @ Error::CommandTimeout(_)) => {
                error!(command = %request.command, error = %e, "Command execution timed out");
                self.executor.command_stats().record_error(&e);
                encode(&ExecReply {
                    status: "error".to_string(),
                    command: Some(request.command),
                    output: None,
                    exit_code: Some(-1),
                    error: Some(e.to_string()),
                    timestamp: rfc3339_now(),
                })
            }
            Err(e) => {
                error!(command = %request.command, error = %e, "Command execution failed");
                self.executor.command_stats().record_error(&e);
                encode(&ExecReply {
                    status: "error".to_string(),
                    command: None,
                    output: None,
                    exit_code: None,
                    error: Some(e.to_string()),
                    timestamp: rfc3339_now(),
                })
            }
        }
    }

    fn handle_health(&self) -> Vec<u8> {
        debug!("Received health check command");

        let nats = self.bus_status.health();
        let tasks = self.executor.task_metrics();
        let status = determine_health(&nats, &tasks);

        let reply = HealthReply {
            status: status.to_string(),
            timestamp: rfc3339_now(),
            agent: self.executor.agent_health(),
            nats,
            tasks,
            config: ConfigSummary {
                device_id: self.config.device_id.clone(),
                subject_prefix: self.config.subject_prefix.clone(),
                version: self.executor.version().to_string(),
                enabled_tasks: self.config.enabled_tasks(),
            },
            os: inventory::os_facts(),
        };

        debug!(status, "Sending health response");
        encode(&reply)
    }

    fn invalid_request(&self, what: &str, error: serde_json::Error) -> Vec<u8> {
        error!(error = %error, "Failed to parse {what} request");
        self.executor.command_stats().record_error(&error);
        encode(&ErrorReply::new("Invalid request format"))
    }
}

/// Overall status for the health reply: unhealthy without a bus
/// connection, degraded on an unstable connection or a failing metrics
/// pipeline, healthy otherwise.
pub(crate) fn determine_health(nats: &BusHealth, tasks: &TaskHealthMetrics) -> &'static str {
    if !nats.connected {
        return "unhealthy";
    }
    if nats.reconnects > 10 {
        return "degraded";
    }
    if tasks.metrics_count > 0 {
        let failure_rate = tasks.metrics_failures as f64 / tasks.metrics_count as f64;
        if failure_rate > 0.5 {
            return "degraded";
        }
    }
    "healthy"
}

/// Command output goes on the wire as parsed JSON when it is valid JSON,
/// as a JSON string otherwise. Always attempted on the trimmed output so
/// text like `[ERROR] message` is not mistaken for JSON.
pub(crate) fn encode_exec_output(output: &str) -> serde_json::Value {
    let trimmed = output.trim();
    if !trimmed.is_empty() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return value;
        }
    }
    serde_json::Value::String(output.to_string())
}

fn encode<T: Serialize>(reply: &T) -> Vec<u8> {
    serde_json::to_vec(reply).unwrap_or_else(|_| br#"{"status":"error"}"#.to_vec())
}

/// Subscribe every command subject and spawn its dispatch loop.
pub async fn subscribe_all(
    bus: &Arc<BusClient>,
    handlers: Arc<CommandHandlers>,
) -> hostlink_core::Result<Vec<JoinHandle<()>>> {
    let mut loops = Vec::with_capacity(CommandKind::ALL.len());
    for kind in CommandKind::ALL {
        let subject = kind.subject(&handlers.config.subject_prefix, &handlers.config.device_id);
        let subscriber = bus.subscribe(&subject).await?;
        loops.push(tokio::spawn(dispatch_loop(
            kind,
            subscriber,
            Arc::clone(bus),
            Arc::clone(&handlers),
        )));
    }
    Ok(loops)
}

async fn dispatch_loop(
    kind: CommandKind,
    mut subscriber: async_nats::Subscriber,
    bus: Arc<BusClient>,
    handlers: Arc<CommandHandlers>,
) {
    while let Some(message) = subscriber.next().await {
        bus.metrics().record_receive(message.payload.len() as u64);
        let bus = Arc::clone(&bus);
        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            handle_message(kind, message, bus, handlers).await;
        });
    }
    debug!(handler = kind.name(), "Subscription closed");
}

/// Run one request through a panic barrier and send exactly one reply.
async fn handle_message(
    kind: CommandKind,
    message: async_nats::Message,
    bus: Arc<BusClient>,
    handlers: Arc<CommandHandlers>,
) {
    let Some(reply_subject) = message.reply else {
        warn!(handler = kind.name(), "Request without a reply subject, dropping");
        return;
    };

    let payload = message.payload.to_vec();
    let barrier: JoinHandle<Vec<u8>> = tokio::spawn(async move {
        handlers.route(kind, &payload).await
    });

    let reply = match barrier.await {
        Ok(reply) => reply,
        Err(e) if e.is_panic() => {
            let panic = panic_message(e.into_panic());
            error!(
                handler = kind.name(),
                panic = %panic,
                "Panic recovered in command handler"
            );
            encode(&ErrorReply::new(format!(
                "Internal error: handler panicked: {panic}"
            )))
        }
        Err(_) => return,
    };

    if let Err(e) = bus.reply(reply_subject.as_str(), reply).await {
        error!(handler = kind.name(), error = %e, "Failed to send reply");
    }
}
