//! Hostlink endpoint agent.
//!
//! Exposes one managed host to a control plane over a NATS bus: periodic
//! telemetry out (heartbeat, system metrics, service status, inventory),
//! whitelisted commands in (ping, service control, log tail, exec, health).

pub mod agent;
pub mod executor;
pub mod handlers;
pub mod logging;
pub mod scheduler;

pub use agent::Agent;
pub use executor::Executor;
