//! Task executor: the single value owning the metrics cache, the task and
//! command counters, and the probe facades used by both the scheduler and
//! the command handlers.

use hostlink_core::config::CommandsConfig;
use hostlink_core::messages::{
    AgentHealth, Heartbeat, Inventory, ServiceStatus, SystemMetrics, TaskHealthMetrics,
};
use hostlink_core::ports::ServiceManager;
use hostlink_core::state::{CommandStats, TaskStats};
use hostlink_core::{Error, Result};
use hostlink_exec::{ShellRunner, whitelist};
use hostlink_metrics::MetricsExtractor;
use hostlink_probes::{inventory, logs, services};
use std::sync::Arc;
use tracing::info;

pub struct Executor {
    version: String,
    commands: CommandsConfig,
    metrics: MetricsExtractor,
    service_manager: Arc<dyn ServiceManager>,
    shell: ShellRunner,
    task_stats: Arc<TaskStats>,
    command_stats: Arc<CommandStats>,
}

impl Executor {
    pub fn new(
        version: &str,
        commands: CommandsConfig,
        metrics_volume: &str,
        service_manager: Arc<dyn ServiceManager>,
    ) -> Result<Self> {
        Ok(Self {
            version: version.to_string(),
            metrics: MetricsExtractor::new(version, metrics_volume)?,
            shell: ShellRunner::new(commands.timeout),
            service_manager,
            commands,
            task_stats: Arc::new(TaskStats::new()),
            command_stats: Arc::new(CommandStats::new()),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn create_heartbeat(&self) -> Heartbeat {
        Heartbeat::new(&self.version)
    }

    /// Scrape the exporter and extract a metrics sample against the cache.
    pub async fn scrape_metrics(&self, exporter_url: &str) -> Result<SystemMetrics> {
        self.metrics.scrape(exporter_url).await
    }

    pub async fn service_statuses(&self, service_names: &[String]) -> Result<Vec<ServiceStatus>> {
        services::service_statuses(self.service_manager.as_ref(), service_names).await
    }

    pub async fn control_service(&self, name: &str, action: &str) -> Result<String> {
        services::control_service(
            self.service_manager.as_ref(),
            name,
            action,
            &self.commands.allowed_services,
        )
        .await
    }

    pub async fn collect_inventory(&self) -> Result<Inventory> {
        let version = self.version.clone();
        tokio::task::spawn_blocking(move || inventory::collect_inventory(&version))
            .await
            .map_err(|e| Error::Internal(format!("inventory collection failed: {e}")))
    }

    pub fn fetch_log_lines(&self, log_path: &str, lines: i64) -> Result<Vec<String>> {
        logs::fetch_log_lines(log_path, lines, &self.commands.allowed_log_paths)
    }

    /// Authorize and run a remote command through the host shell.
    pub async fn execute_command(&self, command: &str) -> Result<hostlink_exec::ExecOutput> {
        let authorized = whitelist::authorize(
            command,
            &self.commands.allowed_commands,
            self.commands.scripts_directory.as_deref(),
        )?;
        info!(
            command,
            resolved = %authorized.command_line(),
            timeout = ?self.commands.timeout,
            "Executing whitelisted command"
        );
        self.shell.run(&authorized.command_line()).await
    }

    pub fn task_stats(&self) -> &Arc<TaskStats> {
        &self.task_stats
    }

    pub fn command_stats(&self) -> &Arc<CommandStats> {
        &self.command_stats
    }

    pub fn task_metrics(&self) -> TaskHealthMetrics {
        self.task_stats.snapshot()
    }

    pub fn agent_health(&self) -> AgentHealth {
        let commands = self.command_stats.snapshot();
        AgentHealth {
            version: self.version.clone(),
            uptime_seconds: commands.uptime_seconds,
            commands_processed: commands.processed,
            commands_errored: commands.errored,
            last_error: commands.last_error,
            last_error_time: commands.last_error_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hostlink_core::messages::ServiceState;
    use std::time::Duration;

    struct NoopManager;

    #[async_trait]
    impl ServiceManager for NoopManager {
        async fn status(&self, _name: &str) -> Result<ServiceState> {
            Ok(ServiceState::Running)
        }
        async fn start(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn executor(commands: CommandsConfig) -> Executor {
        Executor::new("1.0.0-test", commands, "C:", Arc::new(NoopManager)).unwrap()
    }

    #[test]
    fn heartbeat_carries_version() {
        let executor = executor(CommandsConfig::default());
        let heartbeat = executor.create_heartbeat();
        assert_eq!(heartbeat.version, "1.0.0-test");
        assert!(!heartbeat.timestamp.is_empty());
    }

    #[tokio::test]
    async fn control_service_rejects_before_manager_access() {
        let executor = executor(CommandsConfig::default());
        let err = executor.control_service("App", "start").await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotAllowed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_command_enforces_whitelist() {
        let commands = CommandsConfig {
            allowed_commands: vec!["echo ok".to_string()],
            timeout: Duration::from_secs(5),
            ..CommandsConfig::default()
        };
        let executor = executor(commands);

        let out = executor.execute_command("echo ok").await.unwrap();
        assert_eq!(out.output.trim(), "ok");

        let err = executor.execute_command("echo nope").await.unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed));
    }

    #[tokio::test]
    async fn inventory_snapshot_includes_version() {
        let executor = executor(CommandsConfig::default());
        let inventory = executor.collect_inventory().await.unwrap();
        assert_eq!(inventory.agent.version, "1.0.0-test");
    }

    #[test]
    fn agent_health_reflects_command_stats() {
        let executor = executor(CommandsConfig::default());
        executor.command_stats().record_success();
        executor.command_stats().record_error("bad input");

        let health = executor.agent_health();
        assert_eq!(health.commands_processed, 2);
        assert_eq!(health.commands_errored, 1);
        assert_eq!(health.last_error.as_deref(), Some("bad input"));
    }
}
