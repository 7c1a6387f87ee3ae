//! NATS bus client for the hostlink agent.

mod bus;
pub mod config;
pub mod metrics;

pub use bus::BusClient;
pub use config::BusConfig;
pub use metrics::{ClientMetrics, MetricsSnapshot};
