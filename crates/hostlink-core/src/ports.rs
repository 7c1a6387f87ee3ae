//! Port traits between the agent core and its adapters.

use crate::Result;
use crate::messages::ServiceState;
use async_trait::async_trait;

/// Publish capability handed to the telemetry scheduler.
///
/// Implementations enqueue on a durable stream and return once the message
/// is accepted for delivery; acknowledgment is resolved out of band.
#[async_trait]
pub trait TelemetryBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;
}

/// Read-only view of the bus connection for the health handler.
pub trait BusStatus: Send + Sync {
    fn health(&self) -> crate::messages::BusHealth;
}

/// OS service manager operations.
///
/// Each call resolves the service by name, mirroring the per-request
/// open/close cycle of the underlying service control manager.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Query the current lifecycle state of a service.
    async fn status(&self, name: &str) -> Result<ServiceState>;

    /// Request a service start. Returns once the request is accepted.
    async fn start(&self, name: &str) -> Result<()>;

    /// Request a service stop. Returns once the request is accepted.
    async fn stop(&self, name: &str) -> Result<()>;
}
