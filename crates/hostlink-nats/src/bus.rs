//! NATS bus client.
//!
//! One persistent connection per agent process: telemetry goes out through
//! JetStream with fire-and-forget semantics (acknowledgment resolved in a
//! background task), commands come in over core request/reply
//! subscriptions.

use crate::config::BusConfig;
use crate::metrics::ClientMetrics;
use async_nats::connection::State;
use async_nats::{Event, jetstream};
use async_trait::async_trait;
use hostlink_core::config::AuthConfig;
use hostlink_core::messages::BusHealth;
use hostlink_core::ports::{BusStatus, TelemetryBus};
use hostlink_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Live connection handles. Both are cheap clones over the same
/// underlying connection.
#[derive(Clone)]
struct Connection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// Bus client owning the NATS connection and its JetStream context.
///
/// The handles live behind an `Option` so a drain (or a drain timeout)
/// can hard-close the connection by dropping them; every operation after
/// that fails fast with a closed-connection error.
pub struct BusClient {
    connection: RwLock<Option<Connection>>,
    metrics: Arc<ClientMetrics>,
}

impl BusClient {
    /// Connect to the bus. Initial connection failure is fatal to the
    /// caller; once connected, reconnection is handled internally.
    pub async fn connect(config: BusConfig) -> Result<Self> {
        let metrics = ClientMetrics::new();

        let mut options = async_nats::ConnectOptions::new().name(config.name.as_str());

        let wait = config.reconnect_wait;
        options = options.reconnect_delay_callback(move |_attempts| wait);

        if let Some(max) = config.max_reconnects {
            options = options.max_reconnects(max);
        }

        // The callback also fires for the initial connect; only later
        // connects count as reconnections.
        let first_connect = Arc::new(AtomicBool::new(true));
        let cb_metrics = Arc::clone(&metrics);
        options = options.event_callback(move |event| {
            let metrics = Arc::clone(&cb_metrics);
            let first_connect = Arc::clone(&first_connect);
            async move {
                match event {
                    Event::Connected => {
                        if first_connect.swap(false, Ordering::Relaxed) {
                            info!("Bus connected");
                        } else {
                            metrics.record_reconnect();
                            info!("Bus reconnected");
                        }
                    }
                    Event::Disconnected => {
                        warn!("Bus disconnected");
                    }
                    Event::Closed => {
                        info!("Bus connection closed");
                    }
                    other => {
                        warn!(event = ?other, "Bus event");
                    }
                }
            }
        });

        options = match &config.auth {
            AuthConfig::Creds { creds_file } => {
                info!(file = %creds_file.display(), "Using credentials file authentication");
                options
                    .credentials_file(creds_file)
                    .await
                    .map_err(|e| Error::BusConnect(format!("failed to load credentials file: {e}")))?
            }
            AuthConfig::Token { token } => {
                info!("Using token authentication");
                options.token(token.clone())
            }
            AuthConfig::UserPass { username, password } => {
                info!(username = %username, "Using username/password authentication");
                options.user_and_password(username.clone(), password.clone())
            }
            AuthConfig::None => {
                info!("Using no authentication");
                options
            }
        };

        if let Some(tls) = config.tls.as_ref().filter(|tls| tls.enabled) {
            options = options.require_tls(true);
            if let Some(ca) = &tls.ca_file {
                options = options.add_root_certificates(ca.clone());
            }
            if let (Some(cert), Some(key)) = (&tls.cert_file, &tls.key_file) {
                options = options.add_client_certificate(cert.clone(), key.clone());
            }
        }

        info!(urls = ?config.urls, "Connecting to bus");
        let client = options
            .connect(config.urls.join(","))
            .await
            .map_err(|e| Error::BusConnect(e.to_string()))?;

        let server = client.server_info();
        info!(
            server_id = %server.server_id,
            host = %server.host,
            "Connected to bus"
        );

        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            connection: RwLock::new(Some(Connection { client, jetstream })),
            metrics,
        })
    }

    /// Clone the live handles out, so no lock is held across awaits.
    fn connection(&self) -> Option<Connection> {
        self.connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the connection handles and log the final counters.
    fn close(&self, what: &str) {
        let dropped = self
            .connection
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if dropped.is_some() {
            let snapshot = self.metrics.snapshot();
            info!(
                published = snapshot.messages_published,
                received = snapshot.messages_received,
                publish_failures = snapshot.publish_failures,
                bytes_published = snapshot.bytes_published,
                bytes_received = snapshot.bytes_received,
                reconnects = snapshot.reconnects,
                "{}",
                what
            );
        }
    }

    /// Queue a telemetry message on the durable stream and return once it
    /// is enqueued. Acknowledgment (or terminal failure after the stream's
    /// retries) is resolved and logged in a background task; the only
    /// synchronous failure is inability to enqueue.
    pub async fn publish_telemetry(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let Some(conn) = self.connection() else {
            self.metrics.record_publish_failure();
            return Err(Error::PublishQueue {
                subject: subject.to_string(),
                reason: "connection closed".to_string(),
            });
        };

        let bytes = payload.len() as u64;
        let ack = conn
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| {
                self.metrics.record_publish_failure();
                Error::PublishQueue {
                    subject: subject.to_string(),
                    reason: e.to_string(),
                }
            })?;
        self.metrics.record_publish(bytes);

        let metrics = Arc::clone(&self.metrics);
        let subject = subject.to_string();
        tokio::spawn(async move {
            match ack.await {
                Ok(_) => {
                    debug!(subject = %subject, bytes, "Published telemetry");
                }
                Err(e) => {
                    metrics.record_publish_failure();
                    warn!(subject = %subject, error = %e, "Failed to publish telemetry after retries");
                }
            }
        });

        Ok(())
    }

    /// Publish and wait for the stream acknowledgment. Used where delivery
    /// must be confirmed before proceeding.
    pub async fn publish_telemetry_sync(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Err(Error::PublishQueue {
                subject: subject.to_string(),
                reason: "connection closed".to_string(),
            });
        };

        let bytes = payload.len() as u64;
        let ack = conn
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::PublishQueue {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(timeout, ack).await {
            Ok(Ok(_)) => {
                self.metrics.record_publish(bytes);
                debug!(subject, bytes, "Published telemetry (sync)");
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.record_publish_failure();
                Err(Error::PublishQueue {
                    subject: subject.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.metrics.record_publish_failure();
                Err(Error::PublishQueue {
                    subject: subject.to_string(),
                    reason: format!("publish timeout after {timeout:?}"),
                })
            }
        }
    }

    /// Subscribe to a command subject. The returned subscriber is driven by
    /// the handler dispatch layer.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        let Some(conn) = self.connection() else {
            return Err(Error::Subscribe {
                subject: subject.to_string(),
                reason: "connection closed".to_string(),
            });
        };

        let subscriber = conn
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| Error::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        info!(subject, "Subscribed to subject");
        Ok(subscriber)
    }

    /// Publish a reply to a request's reply subject.
    pub async fn reply(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Err(Error::PublishQueue {
                subject: subject.to_string(),
                reason: "connection closed".to_string(),
            });
        };

        conn.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::PublishQueue {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }

    /// Gracefully close the connection: refuse new work, let in-flight
    /// handlers finish, flush buffered publishes. When the budget expires
    /// the connection is hard-closed and the caller is notified. Safe to
    /// call on an already-closed connection.
    pub async fn drain(&self, budget: Duration) -> Result<()> {
        let Some(conn) = self.connection() else {
            info!("Connection already closed");
            return Ok(());
        };

        info!(timeout = ?budget, "Draining bus connection");
        match tokio::time::timeout(budget, conn.client.drain()).await {
            Ok(Ok(())) => {
                self.close("Bus drain completed");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Error during bus drain");
                self.close("Bus connection closed after drain error");
                Err(Error::Internal(format!("drain failed: {e}")))
            }
            Err(_) => {
                warn!("Bus drain timeout, forcing close");
                self.close("Bus connection force-closed");
                Err(Error::DrainTimeout(budget))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection()
            .map(|conn| conn.client.connection_state() == State::Connected)
            .unwrap_or(false)
    }

    /// Client-side counters (receive accounting is recorded by the
    /// dispatch layer).
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    /// Connection statistics for the health reply. Reconnects come from
    /// the client counters, message and byte totals from the connection
    /// itself.
    pub fn stats(&self) -> BusHealth {
        let snapshot = self.metrics.snapshot();

        let Some(conn) = self.connection() else {
            return BusHealth {
                reconnects: snapshot.reconnects,
                ..BusHealth::default()
            };
        };

        let connected = conn.client.connection_state() == State::Connected;
        let statistics = conn.client.statistics();
        let server = conn.client.server_info();

        BusHealth {
            connected,
            server_url: connected.then(|| format!("{}:{}", server.host, server.port)),
            server_id: connected.then(|| server.server_id.clone()),
            reconnects: snapshot.reconnects,
            in_msgs: statistics.in_messages.load(Ordering::Relaxed),
            out_msgs: statistics.out_messages.load(Ordering::Relaxed),
            in_bytes: statistics.in_bytes.load(Ordering::Relaxed),
            out_bytes: statistics.out_bytes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl TelemetryBus for BusClient {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.publish_telemetry(subject, payload).await
    }
}

impl BusStatus for BusClient {
    fn health(&self) -> BusHealth {
        self.stats()
    }
}
