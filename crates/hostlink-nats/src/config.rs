//! Configuration for the NATS bus client.

use hostlink_core::config::{AuthConfig, NatsSettings, TlsConfig};
use std::time::Duration;

/// Connection configuration for the bus client.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Server URLs, in failover order.
    pub urls: Vec<String>,
    /// Connection name reported to the server.
    pub name: String,
    /// Authentication descriptor.
    pub auth: AuthConfig,
    /// Optional TLS descriptor.
    pub tls: Option<TlsConfig>,
    /// Maximum reconnection attempts. `None` retries forever.
    pub max_reconnects: Option<usize>,
    /// Wait between reconnection attempts.
    pub reconnect_wait: Duration,
    /// Budget for graceful drain during shutdown.
    pub drain_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            name: "hostlink-agent".to_string(),
            auth: AuthConfig::None,
            tls: None,
            max_reconnects: None,
            reconnect_wait: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl BusConfig {
    /// Create a config with a single URL and defaults for everything else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Build from the agent's loaded configuration section.
    pub fn from_settings(settings: &NatsSettings) -> Self {
        Self {
            urls: settings.urls.clone(),
            name: "hostlink-agent".to_string(),
            auth: settings.auth.clone(),
            tls: settings.tls.clone(),
            max_reconnects: settings.max_reconnects,
            reconnect_wait: settings.reconnect_wait,
            drain_timeout: settings.drain_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_copies_connection_fields() {
        let settings = NatsSettings {
            urls: vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()],
            auth: AuthConfig::Token {
                token: "t".to_string(),
            },
            tls: None,
            max_reconnects: Some(5),
            reconnect_wait: Duration::from_secs(3),
            drain_timeout: Duration::from_secs(45),
        };
        let config = BusConfig::from_settings(&settings);
        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.max_reconnects, Some(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(45));
        assert!(matches!(config.auth, AuthConfig::Token { .. }));
    }
}
