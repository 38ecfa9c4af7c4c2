//! Cloud provider integration
//!
//! The harness talks to a cloud through three seams: an [`Account`] that
//! logs in, a [`VmHandle`] bound to one named VM, and the [`CloudProvider`]
//! factory that hands both out together with remote sessions.

mod azure;
mod kubevirt;

pub use azure::AzureProvider;
pub use kubevirt::KubeVirtProvider;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{HarnessConfig, ProviderKind};
use crate::models::{Scenario, VmDescriptor};
use crate::session::RemoteSession;

/// Cloud account authentication
#[async_trait]
pub trait Account: Send + Sync {
    async fn login(&self) -> Result<()>;
}

/// Handle on one named VM
#[async_trait]
pub trait VmHandle: Send + Sync {
    fn descriptor(&self) -> &VmDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Create the VM; with `wait` the call returns once the VM is provisioned
    async fn create(&self, wait: bool) -> Result<()>;

    /// Delete the VM; without `wait` the request is only submitted
    async fn delete(&self, wait: bool) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn reboot(&self) -> Result<()>;

    /// Refresh and return the provider's view of the VM
    async fn show(&self) -> Result<VmStatus>;

    async fn exists(&self) -> Result<bool>;

    async fn is_stopped(&self) -> Result<bool>;

    /// Address sessions connect to
    async fn public_address(&self) -> Result<String>;
}

/// Factory binding account, VM handles and sessions for one backend
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn account(&self) -> &dyn Account;

    fn vm(&self, descriptor: VmDescriptor) -> Arc<dyn VmHandle>;

    /// Open an unconnected session against `vm`
    fn session(&self, vm: Arc<dyn VmHandle>) -> Box<dyn RemoteSession>;

    /// Why this backend cannot run `scenario`, if it cannot
    fn unsupported_reason(&self, _scenario: Scenario) -> Option<&'static str> {
        None
    }
}

/// Provider-reported power state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    Deallocated,
    Transitioning,
    Unknown,
}

impl PowerState {
    /// Parse an Azure `powerState` value such as "VM running"
    pub fn from_azure(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "vm running" => PowerState::Running,
            "vm stopped" => PowerState::Stopped,
            "vm deallocated" => PowerState::Deallocated,
            "vm starting" | "vm stopping" | "vm deallocating" => PowerState::Transitioning,
            _ => PowerState::Unknown,
        }
    }

    /// Parse a KubeVirt `printableStatus`
    pub fn from_kubevirt(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" => PowerState::Running,
            "stopped" => PowerState::Stopped,
            "starting" | "stopping" | "provisioning" | "migrating" | "terminating"
            | "waitingforvolumebinding" => PowerState::Transitioning,
            _ => PowerState::Unknown,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PowerState::Stopped | PowerState::Deallocated)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Running => write!(f, "Running"),
            PowerState::Stopped => write!(f, "Stopped"),
            PowerState::Deallocated => write!(f, "Deallocated"),
            PowerState::Transitioning => write!(f, "Transitioning"),
            PowerState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Snapshot returned by [`VmHandle::show`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    pub name: String,
    pub power_state: PowerState,
    pub address: Option<String>,
}

/// Build the provider selected in the configuration
pub async fn from_config(config: &HarnessConfig) -> Result<Arc<dyn CloudProvider>> {
    let ssh = config.session.ssh_config();

    match config.provider.kind {
        ProviderKind::Azure => Ok(Arc::new(AzureProvider::new(
            config.provider.azure.clone(),
            ssh,
        ))),
        ProviderKind::Kubevirt => Ok(Arc::new(
            KubeVirtProvider::connect(config.provider.kubevirt.clone(), ssh).await?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_power_state() {
        assert_eq!(PowerState::from_azure("VM running"), PowerState::Running);
        assert_eq!(
            PowerState::from_azure("VM deallocated"),
            PowerState::Deallocated
        );
        assert_eq!(
            PowerState::from_azure("VM deallocating"),
            PowerState::Transitioning
        );
        assert_eq!(PowerState::from_azure(""), PowerState::Unknown);
    }

    #[test]
    fn test_kubevirt_power_state() {
        assert_eq!(PowerState::from_kubevirt("Running"), PowerState::Running);
        assert_eq!(PowerState::from_kubevirt("Stopped"), PowerState::Stopped);
        assert_eq!(
            PowerState::from_kubevirt("Provisioning"),
            PowerState::Transitioning
        );
    }

    #[test]
    fn test_stopped_states() {
        assert!(PowerState::Stopped.is_stopped());
        assert!(PowerState::Deallocated.is_stopped());
        assert!(!PowerState::Running.is_stopped());
        assert!(!PowerState::Transitioning.is_stopped());
    }
}
