//! Rate extraction from decoded metric families.
//!
//! CPU usage and disk I/O rates come from monotonic counters and need two
//! observations; the previous observation lives in the executor's metrics
//! cache. The first scrape stores a baseline and reports those values as
//! zero.

use crate::scrape::ExporterClient;
use crate::text::{self, MetricFamily};
use hostlink_core::messages::{SystemMetrics, rfc3339_now};
use hostlink_core::state::MetricsCache;
use hostlink_core::util::round2;
use hostlink_core::{Error, Result};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

const CPU_TIME_TOTAL: &str = "windows_cpu_time_total";
const MEMORY_AVAILABLE_BYTES: &str = "windows_memory_available_bytes";
const MEMORY_PHYSICAL_FREE_BYTES: &str = "windows_memory_physical_free_bytes";
const DISK_FREE_BYTES: &str = "windows_logical_disk_free_bytes";
const DISK_SIZE_BYTES: &str = "windows_logical_disk_size_bytes";
const DISK_READ_BYTES_TOTAL: &str = "windows_logical_disk_read_bytes_total";
const DISK_WRITE_BYTES_TOTAL: &str = "windows_logical_disk_write_bytes_total";

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Turns exporter responses into `SystemMetrics`, keeping the previous
/// counter samples in its cache.
pub struct MetricsExtractor {
    client: ExporterClient,
    cache: MetricsCache,
    volume: String,
}

impl MetricsExtractor {
    pub fn new(version: &str, volume: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: ExporterClient::new(version)?,
            cache: MetricsCache::new(),
            volume: volume.into(),
        })
    }

    /// Scrape the exporter and extract a metrics sample.
    pub async fn scrape(&self, exporter_url: &str) -> Result<SystemMetrics> {
        debug!(url = exporter_url, "Starting metrics scrape");
        let body = self.client.fetch(exporter_url).await?;
        let families = text::parse(&body)?;
        debug!(families = families.len(), "Parsed metric families");
        self.extract(&families, Instant::now())
    }

    /// Age of the cached baseline, read without blocking a scrape.
    pub fn last_scrape(&self) -> Option<Instant> {
        self.cache.last_scrape()
    }

    /// Extract a sample from decoded families at time `now`, updating the
    /// cache. Separated from the HTTP path for tests.
    pub fn extract(
        &self,
        families: &HashMap<String, MetricFamily>,
        now: Instant,
    ) -> Result<SystemMetrics> {
        let mut metrics = SystemMetrics {
            timestamp: rfc3339_now(),
            ..SystemMetrics::default()
        };

        // Aggregate before taking the lock; only the cache comparison and
        // update happen inside it.
        let cpu_totals = aggregate_cpu(families);
        let memory_free = extract_memory_free(families);
        let disk_free_percent = extract_disk_free_percent(families, &self.volume);
        let disk_read = counter_for_volume(families, DISK_READ_BYTES_TOTAL, &self.volume);
        let disk_write = counter_for_volume(families, DISK_WRITE_BYTES_TOTAL, &self.volume);

        if let Some(free_gb) = memory_free {
            metrics.memory_free_gb = round2(free_gb / BYTES_PER_GIB);
        } else {
            warn!("Memory metric not found");
        }
        if let Some(percent) = disk_free_percent {
            metrics.disk_free_percent = percent;
        }

        let first_scrape;
        {
            let mut cache = self.cache.write();
            first_scrape = cache.last_scrape.is_none();

            if let Some((total, idle)) = cpu_totals {
                if !first_scrape && total > 0.0 && cache.cpu_total > 0.0 {
                    let total_delta = total - cache.cpu_total;
                    let idle_delta = idle - cache.cpu_idle;
                    if total_delta > 0.0 {
                        let idle_percent = (idle_delta / total_delta) * 100.0;
                        metrics.cpu_usage_percent = round2(100.0 - idle_percent);
                        debug!(
                            total_delta,
                            idle_delta,
                            usage_percent = metrics.cpu_usage_percent,
                            "CPU calculated"
                        );
                    }
                }
                cache.cpu_total = total;
                cache.cpu_idle = idle;
            } else if !first_scrape {
                warn!("CPU metric not found or could not be calculated");
            }

            let elapsed = cache
                .last_scrape
                .map(|last| now.duration_since(last).as_secs_f64());
            if let Some(read_total) = disk_read {
                if let Some(elapsed) = elapsed.filter(|&s| s > 0.0) {
                    if cache.disk_read_bytes > 0.0 {
                        metrics.disk_read_bytes_per_sec =
                            round2((read_total - cache.disk_read_bytes) / elapsed);
                    }
                }
                cache.disk_read_bytes = read_total;
            }
            if let Some(write_total) = disk_write {
                if let Some(elapsed) = elapsed.filter(|&s| s > 0.0) {
                    if cache.disk_write_bytes > 0.0 {
                        metrics.disk_write_bytes_per_sec =
                            round2((write_total - cache.disk_write_bytes) / elapsed);
                    }
                }
                cache.disk_write_bytes = write_total;
            }

            cache.last_scrape = Some(now);
        }

        if first_scrape {
            debug!("Baseline stored, rates will be calculated on the next scrape");
        } else {
            validate(&metrics)?;
        }

        Ok(metrics)
    }
}

/// Sum CPU seconds across all cores and modes, and separately the `idle`
/// mode, from the per-core per-mode counter family.
fn aggregate_cpu(families: &HashMap<String, MetricFamily>) -> Option<(f64, f64)> {
    let family = families.get(CPU_TIME_TOTAL)?;
    let mut total = 0.0;
    let mut idle = 0.0;
    for sample in &family.samples {
        total += sample.value;
        if sample.label("mode") == Some("idle") {
            idle += sample.value;
        }
    }
    Some((total, idle))
}

/// Free memory in bytes, preferring available over physical-free.
fn extract_memory_free(families: &HashMap<String, MetricFamily>) -> Option<f64> {
    if let Some(value) = families
        .get(MEMORY_AVAILABLE_BYTES)
        .and_then(MetricFamily::first_value)
    {
        return Some(value);
    }
    let fallback = families
        .get(MEMORY_PHYSICAL_FREE_BYTES)
        .and_then(MetricFamily::first_value);
    if fallback.is_some() {
        debug!("Using physical_free_bytes fallback for memory metric");
    }
    fallback
}

fn extract_disk_free_percent(
    families: &HashMap<String, MetricFamily>,
    volume: &str,
) -> Option<f64> {
    let free = families
        .get(DISK_FREE_BYTES)?
        .value_for_label("volume", volume)?;
    let size = families
        .get(DISK_SIZE_BYTES)?
        .value_for_label("volume", volume)?;
    if size > 0.0 {
        Some(round2((free / size) * 100.0))
    } else {
        None
    }
}

fn counter_for_volume(
    families: &HashMap<String, MetricFamily>,
    name: &str,
    volume: &str,
) -> Option<f64> {
    families.get(name)?.value_for_label("volume", volume)
}

/// Sanity checks applied to every non-baseline sample.
fn validate(m: &SystemMetrics) -> Result<()> {
    if m.cpu_usage_percent < 0.0 || m.cpu_usage_percent > 100.0 {
        return Err(Error::MetricsInvalid(format!(
            "invalid CPU usage: {:.2}% (must be 0-100)",
            m.cpu_usage_percent
        )));
    }
    if m.memory_free_gb < 0.0 {
        return Err(Error::MetricsInvalid(format!(
            "invalid memory free: {:.2} GB (cannot be negative)",
            m.memory_free_gb
        )));
    }
    if m.disk_free_percent < 0.0 || m.disk_free_percent > 100.0 {
        return Err(Error::MetricsInvalid(format!(
            "invalid disk free: {:.2}% (must be 0-100)",
            m.disk_free_percent
        )));
    }
    if m.disk_read_bytes_per_sec < 0.0 {
        return Err(Error::MetricsInvalid(format!(
            "invalid disk read rate: {:.2} bytes/sec (cannot be negative)",
            m.disk_read_bytes_per_sec
        )));
    }
    if m.disk_write_bytes_per_sec < 0.0 {
        return Err(Error::MetricsInvalid(format!(
            "invalid disk write rate: {:.2} bytes/sec (cannot be negative)",
            m.disk_write_bytes_per_sec
        )));
    }
    Ok(())
}
