//! Service status probing and whitelisted service control.
//!
//! The probe logic is platform-neutral and talks to a [`ServiceManager`]
//! port; the Windows implementation drives the service control manager,
//! other platforms get a stub that reports the operation as unsupported.

use hostlink_core::messages::{ServiceState, ServiceStatus};
use hostlink_core::ports::ServiceManager;
use hostlink_core::{Error, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How long a control operation waits for the service to reach its target
/// state, polling every [`STATE_POLL_INTERVAL`].
pub const STATE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Requested control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn parse(action: &str) -> Result<Self> {
        match action {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(Error::InvalidServiceAction(other.to_string())),
        }
    }
}

/// Query the status of every configured service.
///
/// Individual open/query failures degrade that entry to `Error`; a
/// service-manager connection failure fails the whole check so the
/// scheduler can publish an error variant instead.
pub async fn service_statuses(
    manager: &dyn ServiceManager,
    services: &[String],
) -> Result<Vec<ServiceStatus>> {
    let mut statuses = Vec::with_capacity(services.len());
    for name in services {
        match manager.status(name).await {
            Ok(state) => statuses.push(ServiceStatus {
                name: name.clone(),
                status: state,
            }),
            Err(Error::ServiceManagerConnect(reason)) => {
                return Err(Error::ServiceManagerConnect(reason));
            }
            Err(e) => {
                warn!(service = %name, error = %e, "Failed to query service");
                statuses.push(ServiceStatus {
                    name: name.clone(),
                    status: ServiceState::Error,
                });
            }
        }
    }
    Ok(statuses)
}

/// Start, stop, or restart a whitelisted service.
///
/// The whitelist is checked before any service-manager connection; nothing
/// touches the OS for a disallowed name.
pub async fn control_service(
    manager: &dyn ServiceManager,
    name: &str,
    action: &str,
    allowed_services: &[String],
) -> Result<String> {
    control_service_with_budget(
        manager,
        name,
        action,
        allowed_services,
        STATE_WAIT_TIMEOUT,
        STATE_POLL_INTERVAL,
    )
    .await
}

pub async fn control_service_with_budget(
    manager: &dyn ServiceManager,
    name: &str,
    action: &str,
    allowed_services: &[String],
    state_timeout: Duration,
    poll_interval: Duration,
) -> Result<String> {
    if !allowed_services.iter().any(|allowed| allowed == name) {
        return Err(Error::ServiceNotAllowed(name.to_string()));
    }
    let action = ServiceAction::parse(action)?;

    match action {
        ServiceAction::Start => {
            manager.start(name).await?;
            Ok(format!("Service {name} started successfully"))
        }
        ServiceAction::Stop => {
            manager.stop(name).await?;
            wait_for_state(manager, name, ServiceState::Stopped, state_timeout, poll_interval)
                .await?;
            Ok(format!("Service {name} stopped successfully"))
        }
        ServiceAction::Restart => {
            manager.stop(name).await?;
            wait_for_state(manager, name, ServiceState::Stopped, state_timeout, poll_interval)
                .await?;
            manager.start(name).await?;
            wait_for_state(manager, name, ServiceState::Running, state_timeout, poll_interval)
                .await?;
            Ok(format!("Service {name} restarted successfully"))
        }
    }
}

async fn wait_for_state(
    manager: &dyn ServiceManager,
    name: &str,
    target: ServiceState,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if manager.status(name).await? == target {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::ServiceStateTimeout {
                name: name.to_string(),
                state: target.to_string(),
            });
        }
        sleep(poll_interval).await;
    }
}

#[cfg(windows)]
mod scm {
    //! Windows service control manager implementation.

    use super::*;
    use async_trait::async_trait;
    use std::ffi::OsStr;
    use windows_service::service::{ServiceAccess, ServiceState as ScmState};
    use windows_service::service_manager::{
        ServiceManager as ScmManager, ServiceManagerAccess,
    };

    #[derive(Debug, Default)]
    pub struct HostServiceManager;

    impl HostServiceManager {
        pub fn new() -> Self {
            Self
        }

        fn open(
            &self,
            name: &str,
            access: ServiceAccess,
        ) -> Result<windows_service::service::Service> {
            let manager =
                ScmManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .map_err(|e| Error::ServiceManagerConnect(e.to_string()))?;
            manager.open_service(name, access).map_err(|e| Error::ServiceOpen {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }
    }

    fn map_state(state: ScmState) -> ServiceState {
        match state {
            ScmState::Stopped => ServiceState::Stopped,
            ScmState::StartPending => ServiceState::StartPending,
            ScmState::StopPending => ServiceState::StopPending,
            ScmState::Running => ServiceState::Running,
            ScmState::ContinuePending => ServiceState::ContinuePending,
            ScmState::PausePending => ServiceState::PausePending,
            ScmState::Paused => ServiceState::Paused,
        }
    }

    #[async_trait]
    impl ServiceManager for HostServiceManager {
        async fn status(&self, name: &str) -> Result<ServiceState> {
            let service = self.open(name, ServiceAccess::QUERY_STATUS)?;
            let status = service.query_status().map_err(|e| Error::ServiceOpen {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            Ok(map_state(status.current_state))
        }

        async fn start(&self, name: &str) -> Result<()> {
            let service = self.open(name, ServiceAccess::START)?;
            service
                .start(&[] as &[&OsStr])
                .map_err(|e| Error::ServiceStart(e.to_string()))
        }

        async fn stop(&self, name: &str) -> Result<()> {
            let service = self.open(name, ServiceAccess::STOP | ServiceAccess::QUERY_STATUS)?;
            service
                .stop()
                .map(|_| ())
                .map_err(|e| Error::ServiceStop(e.to_string()))
        }
    }
}

#[cfg(not(windows))]
mod scm {
    //! Stub used on platforms without a supported service manager.

    use super::*;
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    pub struct HostServiceManager;

    impl HostServiceManager {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl ServiceManager for HostServiceManager {
        async fn status(&self, _name: &str) -> Result<ServiceState> {
            Err(Error::ServiceManagerConnect(
                "service control is not supported on this platform".to_string(),
            ))
        }

        async fn start(&self, _name: &str) -> Result<()> {
            Err(Error::ServiceManagerConnect(
                "service control is not supported on this platform".to_string(),
            ))
        }

        async fn stop(&self, _name: &str) -> Result<()> {
            Err(Error::ServiceManagerConnect(
                "service control is not supported on this platform".to_string(),
            ))
        }
    }
}

pub use scm::HostServiceManager;
