//! Counters for bus client observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the bus client. Reconnects feed the health
/// reply; the rest are reported in the close-time connection summary.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Total messages queued for publish.
    pub messages_published: AtomicU64,
    /// Total messages received on subscriptions.
    pub messages_received: AtomicU64,
    /// Publishes that failed after the stream's retries.
    pub publish_failures: AtomicU64,
    /// Reconnections observed since the initial connect (which does not
    /// count).
    pub reconnects: AtomicU64,
    /// Total bytes queued for publish.
    pub bytes_published: AtomicU64,
    /// Total bytes received on subscriptions.
    pub bytes_received: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self, bytes: u64) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self, bytes: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of the client counters.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub messages_published: u64,
    pub messages_received: u64,
    pub publish_failures: u64,
    pub reconnects: u64,
    pub bytes_published: u64,
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = ClientMetrics::new();
        metrics.record_publish(128);
        metrics.record_publish(64);
        metrics.record_publish_failure();
        metrics.record_receive(32);
        metrics.record_reconnect();

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_published, 2);
        assert_eq!(snap.bytes_published, 192);
        assert_eq!(snap.publish_failures, 1);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.reconnects, 1);
    }
}
