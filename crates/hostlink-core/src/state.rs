//! Process-wide executor state.
//!
//! Three independent pieces, each behind its own lock: the metrics rate
//! cache, the scheduled task counters, and the command counters. They are
//! plain fields of the owning executor so tests can build isolated
//! instances.

use crate::messages::TaskHealthMetrics;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Last observed counter samples used to turn monotonic counters into
/// per-interval rates.
///
/// Either `last_scrape` is `None` and no field is meaningful, or all fields
/// hold values taken during the same scrape.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheState {
    pub cpu_total: f64,
    pub cpu_idle: f64,
    pub disk_read_bytes: f64,
    pub disk_write_bytes: f64,
    pub last_scrape: Option<Instant>,
}

/// Reader-writer protected cache of the previous scrape's counters.
///
/// A scrape holds the write lock for the whole read-compute-update section,
/// so concurrent readers observe either the pre-scrape or the post-scrape
/// snapshot, never a mix.
#[derive(Debug, Default)]
pub struct MetricsCache {
    inner: RwLock<CacheState>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// True until the first scrape stores a baseline.
    pub fn is_empty(&self) -> bool {
        self.read().last_scrape.is_none()
    }

    pub fn last_scrape(&self) -> Option<Instant> {
        self.read().last_scrape
    }
}

#[derive(Debug, Default)]
struct LastRuns {
    heartbeat: Option<DateTime<Utc>>,
    metrics: Option<DateTime<Utc>>,
    service_check: Option<DateTime<Utc>>,
    inventory: Option<DateTime<Utc>>,
}

/// Monotonic per-task execution counters with last-success timestamps.
#[derive(Debug, Default)]
pub struct TaskStats {
    heartbeat_count: AtomicU64,
    metrics_count: AtomicU64,
    metrics_failures: AtomicU64,
    service_check_count: AtomicU64,
    inventory_count: AtomicU64,
    skipped_ticks: AtomicU64,
    last_runs: RwLock<LastRuns>,
}

impl TaskStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_heartbeat(&self) {
        self.heartbeat_count.fetch_add(1, Ordering::Relaxed);
        self.last_runs.write().unwrap_or_else(|e| e.into_inner()).heartbeat = Some(Utc::now());
    }

    pub fn record_metrics_success(&self) {
        self.metrics_count.fetch_add(1, Ordering::Relaxed);
        self.last_runs.write().unwrap_or_else(|e| e.into_inner()).metrics = Some(Utc::now());
    }

    /// A failed scrape still counts toward the total so the failure rate in
    /// the health reply is failures over attempts.
    pub fn record_metrics_failure(&self) {
        self.metrics_count.fetch_add(1, Ordering::Relaxed);
        self.metrics_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_service_check(&self) {
        self.service_check_count.fetch_add(1, Ordering::Relaxed);
        self.last_runs.write().unwrap_or_else(|e| e.into_inner()).service_check = Some(Utc::now());
    }

    pub fn record_inventory(&self) {
        self.inventory_count.fetch_add(1, Ordering::Relaxed);
        self.last_runs.write().unwrap_or_else(|e| e.into_inner()).inventory = Some(Utc::now());
    }

    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TaskHealthMetrics {
        let last = self.last_runs.read().unwrap_or_else(|e| e.into_inner());
        TaskHealthMetrics {
            heartbeat_count: self.heartbeat_count.load(Ordering::Relaxed),
            metrics_count: self.metrics_count.load(Ordering::Relaxed),
            metrics_failures: self.metrics_failures.load(Ordering::Relaxed),
            service_check_count: self.service_check_count.load(Ordering::Relaxed),
            inventory_count: self.inventory_count.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            last_heartbeat: last.heartbeat.map(fmt_time),
            last_metrics: last.metrics.map(fmt_time),
            last_service_check: last.service_check.map(fmt_time),
            last_inventory: last.inventory.map(fmt_time),
        }
    }
}

/// Command outcome counters. Monotonic except `last_error`, which is
/// overwritten on every failure.
#[derive(Debug)]
pub struct CommandStats {
    processed: AtomicU64,
    errored: AtomicU64,
    last_error: RwLock<Option<(String, DateTime<Utc>)>>,
    started_at: Instant,
}

/// Point-in-time view of the command counters.
#[derive(Debug, Clone)]
pub struct CommandStatsSnapshot {
    pub processed: u64,
    pub errored: u64,
    pub last_error: Option<String>,
    pub last_error_time: Option<String>,
    pub uptime_seconds: u64,
}

impl Default for CommandStats {
    fn default() -> Self {
        Self {
            processed: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            last_error: RwLock::new(None),
            started_at: Instant::now(),
        }
    }
}

impl CommandStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: impl std::fmt::Display) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.errored.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) =
            Some((error.to_string(), Utc::now()));
    }

    pub fn snapshot(&self) -> CommandStatsSnapshot {
        let last = self
            .last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        CommandStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            last_error: last.as_ref().map(|(msg, _)| msg.clone()),
            last_error_time: last.as_ref().map(|(_, at)| fmt_time(*at)),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn cache_starts_empty_and_fills_atomically() {
        let cache = MetricsCache::new();
        assert!(cache.is_empty());

        {
            let mut state = cache.write();
            state.cpu_total = 100.0;
            state.cpu_idle = 40.0;
            state.disk_read_bytes = 1024.0;
            state.disk_write_bytes = 2048.0;
            state.last_scrape = Some(Instant::now());
        }

        assert!(!cache.is_empty());
        let state = cache.read();
        assert_eq!(state.cpu_total, 100.0);
        assert_eq!(state.disk_write_bytes, 2048.0);
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let cache = Arc::new(MetricsCache::new());
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 1..=200u64 {
                    let mut state = cache.write();
                    let v = i as f64;
                    state.cpu_total = v;
                    state.cpu_idle = v;
                    state.disk_read_bytes = v;
                    state.disk_write_bytes = v;
                    state.last_scrape = Some(Instant::now());
                }
            })
        };
        let reader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let state = cache.read();
                    if state.last_scrape.is_some() {
                        // All four counters were written under one lock.
                        assert_eq!(state.cpu_total, state.cpu_idle);
                        assert_eq!(state.disk_read_bytes, state.disk_write_bytes);
                        assert_eq!(state.cpu_total, state.disk_read_bytes);
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn task_stats_count_and_stamp() {
        let stats = TaskStats::new();
        stats.record_heartbeat();
        stats.record_heartbeat();
        stats.record_metrics_success();
        stats.record_metrics_failure();
        stats.record_skipped_tick();

        let snap = stats.snapshot();
        assert_eq!(snap.heartbeat_count, 2);
        assert_eq!(snap.metrics_count, 2);
        assert_eq!(snap.metrics_failures, 1);
        assert_eq!(snap.skipped_ticks, 1);
        assert!(snap.last_heartbeat.is_some());
        assert!(snap.last_service_check.is_none());
    }

    #[test]
    fn command_stats_track_last_error() {
        let stats = CommandStats::new();
        stats.record_success();
        stats.record_error("boom");

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.errored, 1);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
        assert!(snap.last_error_time.is_some());

        std::thread::sleep(Duration::from_millis(5));
        stats.record_error("later");
        assert_eq!(stats.snapshot().last_error.as_deref(), Some("later"));
    }
}
