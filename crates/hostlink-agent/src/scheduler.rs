//! Telemetry scheduler: per-task interval loops with panic isolation.
//!
//! Each enabled task runs in its own loop; a tick executes in a spawned
//! task so a panic is confined to that tick. At most one tick per task is
//! in flight; when the previous tick is still running the next one is
//! skipped and counted. Intervals are fixed from registration time, not
//! drift-corrected.

use crate::executor::Executor;
use hostlink_core::config::Config;
use hostlink_core::messages::TelemetryError;
use hostlink_core::ports::TelemetryBus;
use hostlink_core::state::TaskStats;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const BASELINE_MAX_RETRIES: u32 = 3;
const BASELINE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Drives the periodic telemetry tasks.
pub struct Scheduler {
    runner: Arc<TaskRunner>,
    config: Arc<Config>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(executor: Arc<Executor>, bus: Arc<dyn TelemetryBus>, config: Arc<Config>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = Arc::new(TaskRunner::new(executor, bus, Arc::clone(&config)));
        Self {
            runner,
            config,
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Establish the metrics baseline, then begin dispatching. Non-blocking
    /// beyond the baseline pass; tick loops run in background tasks.
    pub async fn start(&mut self) {
        if self.config.tasks.system_metrics.enabled {
            self.establish_baseline().await;
        }

        let stats = Arc::clone(self.runner.executor.task_stats());

        if self.config.tasks.heartbeat.enabled {
            let runner = Arc::clone(&self.runner);
            self.handles.push(spawn_task_loop(
                "heartbeat",
                self.config.tasks.heartbeat.interval,
                self.shutdown_rx.clone(),
                Arc::clone(&stats),
                move || {
                    let runner = Arc::clone(&runner);
                    async move { runner.publish_heartbeat().await }
                },
            ));
            info!(interval = ?self.config.tasks.heartbeat.interval, "Scheduled heartbeat task");
        }

        if self.config.tasks.system_metrics.enabled {
            let runner = Arc::clone(&self.runner);
            self.handles.push(spawn_task_loop(
                "metrics",
                self.config.tasks.system_metrics.interval,
                self.shutdown_rx.clone(),
                Arc::clone(&stats),
                move || {
                    let runner = Arc::clone(&runner);
                    async move { runner.publish_metrics().await }
                },
            ));
            info!(interval = ?self.config.tasks.system_metrics.interval, "Scheduled metrics task");
        }

        if self.config.tasks.service_check.enabled {
            let runner = Arc::clone(&self.runner);
            self.handles.push(spawn_task_loop(
                "service_check",
                self.config.tasks.service_check.interval,
                self.shutdown_rx.clone(),
                Arc::clone(&stats),
                move || {
                    let runner = Arc::clone(&runner);
                    async move { runner.publish_service_status().await }
                },
            ));
            info!(interval = ?self.config.tasks.service_check.interval, "Scheduled service check task");
        }

        if self.config.tasks.inventory.enabled {
            // One immediate publish so the control plane sees the host
            // shortly after connect, then the periodic tick.
            let priming = Arc::clone(&self.runner);
            self.handles.push(tokio::spawn(async move {
                priming.publish_inventory().await;
            }));

            let runner = Arc::clone(&self.runner);
            self.handles.push(spawn_task_loop(
                "inventory",
                self.config.tasks.inventory.interval,
                self.shutdown_rx.clone(),
                Arc::clone(&stats),
                move || {
                    let runner = Arc::clone(&runner);
                    async move { runner.publish_inventory().await }
                },
            ));
            info!(interval = ?self.config.tasks.inventory.interval, "Scheduled inventory task");
        }

        info!("Scheduler started");
    }

    /// Stop dispatching and wait for in-flight ticks to finish.
    pub async fn shutdown(&mut self) {
        info!("Shutting down scheduler");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(panic = %panic_message(e.into_panic()), "Task loop panicked during shutdown");
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// Rate-based metrics need two samples; scrape synchronously until a
    /// baseline is cached so the first published sample is complete.
    /// Failure is logged but never aborts startup.
    async fn establish_baseline(&self) {
        info!("Establishing metrics baseline");
        let url = &self.config.tasks.system_metrics.exporter_url;

        for attempt in 1..=BASELINE_MAX_RETRIES {
            match self.runner.executor.scrape_metrics(url).await {
                Ok(_) => {
                    info!("Metrics baseline established");
                    return;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt,
                        max_retries = BASELINE_MAX_RETRIES,
                        "Failed to establish metrics baseline"
                    );
                    if attempt < BASELINE_MAX_RETRIES {
                        tokio::time::sleep(BASELINE_RETRY_DELAY).await;
                    }
                }
            }
        }

        warn!("Could not establish metrics baseline after retries; first metrics publish will be missing CPU and disk I/O rates");
    }
}

/// Run `action` every `interval` until shutdown. Each tick runs in a
/// spawned task: a panicking tick is logged and does not affect later
/// ticks, other loops, or the process. A tick that outlives the interval
/// causes following ticks to be skipped, not queued.
pub(crate) fn spawn_task_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<TaskStats>,
    action: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(handle) = in_flight.take() {
                        if handle.is_finished() {
                            reap_tick(name, handle).await;
                        } else {
                            stats.record_skipped_tick();
                            warn!(task = name, "Previous tick still running, skipping");
                            in_flight = Some(handle);
                            continue;
                        }
                    }
                    in_flight = Some(tokio::spawn(action()));
                }
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        if let Some(handle) = in_flight.take() {
                            reap_tick(name, handle).await;
                        }
                        debug!(task = name, "Task loop stopped");
                        break;
                    }
                }
            }
        }
    })
}

async fn reap_tick(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            error!(
                task = name,
                panic = %panic_message(e.into_panic()),
                "Panic recovered in scheduled task"
            );
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Executes one telemetry task end to end: probe, encode, enqueue on the
/// bus, record the outcome.
pub(crate) struct TaskRunner {
    pub(crate) executor: Arc<Executor>,
    bus: Arc<dyn TelemetryBus>,
    config: Arc<Config>,
    heartbeat_subject: String,
    metrics_subject: String,
    service_subject: String,
    inventory_subject: String,
}

impl TaskRunner {
    pub(crate) fn new(
        executor: Arc<Executor>,
        bus: Arc<dyn TelemetryBus>,
        config: Arc<Config>,
    ) -> Self {
        let prefix = &config.subject_prefix;
        let device = &config.device_id;
        Self {
            heartbeat_subject: format!("{prefix}.{device}.heartbeat"),
            metrics_subject: format!("{prefix}.{device}.telemetry.system"),
            service_subject: format!("{prefix}.{device}.telemetry.service"),
            inventory_subject: format!("{prefix}.{device}.telemetry.inventory"),
            executor,
            bus,
            config,
        }
    }

    pub(crate) async fn publish_heartbeat(&self) {
        let heartbeat = self.executor.create_heartbeat();
        if self.publish(&self.heartbeat_subject, &heartbeat, "heartbeat").await {
            self.executor.task_stats().record_heartbeat();
        }
    }

    pub(crate) async fn publish_metrics(&self) {
        let url = &self.config.tasks.system_metrics.exporter_url;
        match self.executor.scrape_metrics(url).await {
            Ok(metrics) => {
                if self.publish(&self.metrics_subject, &metrics, "metrics").await {
                    self.executor.task_stats().record_metrics_success();
                    info!(
                        subject = %self.metrics_subject,
                        cpu_percent = metrics.cpu_usage_percent,
                        memory_free_gb = metrics.memory_free_gb,
                        disk_free_percent = metrics.disk_free_percent,
                        "Queued metrics publish"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to scrape metrics");
                self.executor.task_stats().record_metrics_failure();
                // Publish the failure so the control plane observes it.
                self.publish(&self.metrics_subject, &TelemetryError::new(&e), "metrics error")
                    .await;
            }
        }
    }

    pub(crate) async fn publish_service_status(&self) {
        let services = &self.config.tasks.service_check.services;
        match self.executor.service_statuses(services).await {
            Ok(statuses) => {
                let report = hostlink_core::messages::ServiceStatusReport {
                    services: statuses,
                    timestamp: hostlink_core::messages::rfc3339_now(),
                };
                if self.publish(&self.service_subject, &report, "service status").await {
                    self.executor.task_stats().record_service_check();
                    debug!(
                        subject = %self.service_subject,
                        count = report.services.len(),
                        "Queued service status publish"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to get service statuses");
                self.publish(&self.service_subject, &TelemetryError::new(&e), "service status error")
                    .await;
            }
        }
    }

    pub(crate) async fn publish_inventory(&self) {
        match self.executor.collect_inventory().await {
            Ok(inventory) => {
                if self.publish(&self.inventory_subject, &inventory, "inventory").await {
                    self.executor.task_stats().record_inventory();
                    info!(
                        subject = %self.inventory_subject,
                        os = %inventory.os.name,
                        "Queued inventory publish"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to collect inventory");
            }
        }
    }

    /// Encode and enqueue. Returns whether the message was queued; the
    /// stream owns delivery from there.
    async fn publish<T: Serialize>(&self, subject: &str, message: &T, what: &str) -> bool {
        let data = match serde_json::to_vec(message) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, what, "Failed to encode telemetry");
                return false;
            }
        };
        if let Err(e) = self.bus.publish(subject, data).await {
            error!(error = %e, what, "Failed to queue telemetry publish");
            return false;
        }
        true
    }
}
