//! Agent lifecycle: bring-up order, signal wait, ordered shutdown.
//!
//! The agent exclusively owns the bus client, the scheduler, and the
//! executor; handlers and tasks borrow capabilities, never the handles.

use crate::executor::Executor;
use crate::handlers::{self, CommandHandlers};
use crate::scheduler::Scheduler;
use hostlink_core::Result;
use hostlink_core::config::Config;
use hostlink_nats::{BusClient, BusConfig};
use hostlink_probes::HostServiceManager;
use std::sync::Arc;
use tracing::{error, info};

pub struct Agent {
    config: Arc<Config>,
    bus: Arc<BusClient>,
    scheduler: Scheduler,
}

impl Agent {
    /// Bring up the agent: executor, bus connection, command
    /// subscriptions, scheduler. Any failure here is fatal.
    pub async fn new(config: Config, version: &str) -> Result<Self> {
        let config = Arc::new(config);

        let executor = Arc::new(Executor::new(
            version,
            config.commands.clone(),
            &config.tasks.system_metrics.volume,
            Arc::new(HostServiceManager::new()),
        )?);

        info!("Connecting to bus...");
        let bus = Arc::new(BusClient::connect(BusConfig::from_settings(&config.nats)).await?);

        info!("Subscribing to commands...");
        let command_handlers = Arc::new(CommandHandlers::new(
            Arc::clone(&executor),
            Arc::clone(&config),
            Arc::clone(&bus) as Arc<dyn hostlink_core::ports::BusStatus>,
        ));
        handlers::subscribe_all(&bus, command_handlers).await?;

        let scheduler = Scheduler::new(
            Arc::clone(&executor),
            Arc::clone(&bus) as Arc<dyn hostlink_core::ports::TelemetryBus>,
            Arc::clone(&config),
        );

        Ok(Self {
            config,
            bus,
            scheduler,
        })
    }

    /// Start the scheduler and block until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.scheduler.start().await;

        info!(device_id = %self.config.device_id, "Agent running");

        wait_for_signal().await;
        info!("Received shutdown signal");

        self.shutdown().await
    }

    /// Cooperative shutdown: stop dispatching ticks, wait for in-flight
    /// work, then drain the bus within its configured budget.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down agent gracefully");

        self.scheduler.shutdown().await;

        if let Err(e) = self.bus.drain(self.config.nats.drain_timeout).await {
            error!(error = %e, "Error draining bus connection");
        }

        info!("Agent shutdown complete");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
