//! OS probes for the hostlink agent.

pub mod inventory;
pub mod logs;
pub mod services;

pub use services::HostServiceManager;
