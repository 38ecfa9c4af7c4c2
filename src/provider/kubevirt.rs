//! KubeVirt backend
//!
//! Drives `VirtualMachine` resources through the Kubernetes API and reads
//! guest addresses from the matching `VirtualMachineInstance`. The guest
//! user and its credentials are written by cloud-init. No guest agent
//! provisions these VMs, so scenarios asserting its sudoers drop-in are
//! reported as unsupported.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use super::{Account, CloudProvider, PowerState, VmHandle, VmStatus};
use crate::config::KubeVirtConfig;
use crate::models::{Scenario, VmDescriptor};
use crate::session::{RemoteSession, SshConfig, SshSession};

/// Interval between status polls
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// VirtualMachine custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    plural = "virtualmachines",
    shortname = "vm",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Whether the VM should be running
    #[serde(default)]
    pub running: bool,

    /// Template for the VMI
    pub template: VmiTemplate,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplate {
    pub spec: VmiTemplateSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplateSpec {
    pub domain: DomainSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,

    pub devices: DevicesSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicesSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Disk name (must match volume name)
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// Interface name (must match network name)
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<MasqueradeMode>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct MasqueradeMode {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct PodNetwork {}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloud>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloud {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// VirtualMachine status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub created: bool,

    #[serde(default)]
    pub ready: bool,

    /// Print column data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

/// VirtualMachineInstance, read for its addresses only
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VmiInterface>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiInterface {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
}

/// First address reported by any interface
fn vmi_address(vmi: &VirtualMachineInstance) -> Option<String> {
    let status = vmi.status.as_ref()?;
    status.interfaces.iter().find_map(|iface| {
        iface
            .ip_address
            .clone()
            .filter(|ip| !ip.is_empty())
            .or_else(|| iface.ip_addresses.first().cloned())
    })
}

/// Cloud-init user data provisioning the admin user of `descriptor`
pub fn cloud_init_user_data(descriptor: &VmDescriptor) -> Result<String> {
    let mode = descriptor.authentication;
    let password = descriptor.password.as_deref().filter(|_| mode.allows_password());

    let mut user = serde_json::json!({
        "name": descriptor.username,
        "groups": "wheel",
        "shell": "/bin/bash",
        "lock_passwd": password.is_none(),
    });
    if mode.allows_public_key() {
        if let Some(ref key) = descriptor.ssh_key_value {
            user["ssh_authorized_keys"] = serde_json::json!([key]);
        }
    }

    let mut document = serde_json::json!({
        "users": [user],
        "ssh_pwauth": password.is_some(),
    });
    if let Some(password) = password {
        document["chpasswd"] = serde_json::json!({
            "expire": false,
            "users": [{
                "name": descriptor.username,
                "password": password,
                "type": "text",
            }],
        });
    }

    let body = serde_yaml::to_string(&document).context("Failed to render cloud-init")?;
    Ok(format!("#cloud-config\n{body}"))
}

/// Build the VirtualMachine resource for `descriptor`
pub fn build_vm(descriptor: &VmDescriptor, config: &KubeVirtConfig) -> Result<VirtualMachine> {
    let user_data = cloud_init_user_data(descriptor)?;
    let virtio = || {
        Some(DiskTarget {
            bus: Some("virtio".to_string()),
        })
    };

    Ok(VirtualMachine {
        metadata: kube::api::ObjectMeta {
            name: Some(descriptor.name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(
                [("app.kubernetes.io/managed-by".to_string(), "wala-lifecycle".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: VirtualMachineSpec {
            running: true,
            template: VmiTemplate {
                spec: VmiTemplateSpec {
                    domain: DomainSpec {
                        cpu: Some(CpuSpec {
                            cores: Some(config.cpu_cores),
                        }),
                        memory: Some(MemorySpec {
                            guest: Some(config.memory.clone()),
                        }),
                        devices: DevicesSpec {
                            disks: vec![
                                Disk {
                                    name: "rootdisk".to_string(),
                                    disk: virtio(),
                                    boot_order: Some(1),
                                },
                                Disk {
                                    name: "cloudinit".to_string(),
                                    disk: virtio(),
                                    boot_order: None,
                                },
                            ],
                            interfaces: vec![Interface {
                                name: "default".to_string(),
                                masquerade: Some(MasqueradeMode {}),
                            }],
                        },
                    },
                    networks: vec![Network {
                        name: "default".to_string(),
                        pod: Some(PodNetwork {}),
                    }],
                    volumes: vec![
                        Volume {
                            name: "rootdisk".to_string(),
                            container_disk: Some(ContainerDiskSource {
                                image: config.image.clone(),
                                image_pull_policy: Some("IfNotPresent".to_string()),
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "cloudinit".to_string(),
                            cloud_init_no_cloud: Some(CloudInitNoCloud {
                                user_data: Some(user_data),
                            }),
                            ..Default::default()
                        },
                    ],
                    termination_grace_period_seconds: Some(30),
                },
            },
        },
        status: None,
    })
}

/// Reachability check against the API server
pub struct KubeAccount {
    client: Client,
}

#[async_trait]
impl Account for KubeAccount {
    async fn login(&self) -> Result<()> {
        let version = self
            .client
            .apiserver_version()
            .await
            .context("Failed to reach the Kubernetes API server")?;
        debug!("Connected to Kubernetes {}", version.git_version);
        Ok(())
    }
}

/// KubeVirt provider
pub struct KubeVirtProvider {
    client: Client,
    config: KubeVirtConfig,
    ssh: SshConfig,
    account: KubeAccount,
}

impl KubeVirtProvider {
    /// Connect with the default kubeconfig or in-cluster configuration
    pub async fn connect(config: KubeVirtConfig, ssh: SshConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        Ok(Self {
            account: KubeAccount {
                client: client.clone(),
            },
            client,
            config,
            ssh,
        })
    }
}

impl CloudProvider for KubeVirtProvider {
    fn name(&self) -> &'static str {
        "kubevirt"
    }

    fn account(&self) -> &dyn Account {
        &self.account
    }

    fn vm(&self, descriptor: VmDescriptor) -> Arc<dyn VmHandle> {
        Arc::new(KubeVirtVm {
            descriptor,
            client: self.client.clone(),
            config: self.config.clone(),
        })
    }

    fn session(&self, vm: Arc<dyn VmHandle>) -> Box<dyn RemoteSession> {
        Box::new(SshSession::new(vm, self.ssh.clone()))
    }

    fn unsupported_reason(&self, scenario: Scenario) -> Option<&'static str> {
        scenario
            .checks_sudoers()
            .then_some("Sudoers provisioning by the guest agent is not available on KubeVirt")
    }
}

/// One VirtualMachine in the configured namespace
pub struct KubeVirtVm {
    descriptor: VmDescriptor,
    client: Client,
    config: KubeVirtConfig,
}

impl KubeVirtVm {
    fn vms(&self) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn vmis(&self) -> Api<VirtualMachineInstance> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn name_ref(&self) -> &str {
        &self.descriptor.name
    }

    async fn set_running(&self, running: bool) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "running": running } });
        self.vms()
            .patch(self.name_ref(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to set running={} on {}", running, self.name_ref()))?;
        Ok(())
    }

    /// Poll until the VM reports `target`
    async fn wait_for(&self, target: PowerState) -> Result<()> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);

        loop {
            let status = self.show().await?;
            if status.power_state == target {
                return Ok(());
            }
            if start.elapsed() > timeout {
                anyhow::bail!(
                    "Timeout waiting for VirtualMachine {} to be {} (last: {})",
                    self.name_ref(),
                    target,
                    status.power_state
                );
            }
            debug!("VirtualMachine {} is {}", self.name_ref(), status.power_state);
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_gone(&self) -> Result<()> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);

        while self.exists().await? {
            if start.elapsed() > timeout {
                anyhow::bail!(
                    "Timeout waiting for VirtualMachine {} to be deleted",
                    self.name_ref()
                );
            }
            sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }
}

#[async_trait]
impl VmHandle for KubeVirtVm {
    fn descriptor(&self) -> &VmDescriptor {
        &self.descriptor
    }

    async fn create(&self, wait: bool) -> Result<()> {
        info!(
            "Creating VirtualMachine {}/{}",
            self.config.namespace,
            self.name_ref()
        );
        let vm = build_vm(&self.descriptor, &self.config)?;
        self.vms()
            .create(&PostParams::default(), &vm)
            .await
            .context("Failed to create VirtualMachine")?;

        if wait {
            self.wait_for(PowerState::Running).await?;
        }
        Ok(())
    }

    async fn delete(&self, wait: bool) -> Result<()> {
        info!(
            "Deleting VirtualMachine {}/{}",
            self.config.namespace,
            self.name_ref()
        );
        self.vms()
            .delete(self.name_ref(), &DeleteParams::default())
            .await
            .context("Failed to delete VirtualMachine")?;

        if wait {
            self.wait_gone().await?;
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.set_running(true).await?;
        self.wait_for(PowerState::Running).await
    }

    async fn stop(&self) -> Result<()> {
        self.set_running(false).await?;
        self.wait_for(PowerState::Stopped).await
    }

    async fn reboot(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn show(&self) -> Result<VmStatus> {
        let vm = self
            .vms()
            .get_opt(self.name_ref())
            .await
            .context("Failed to get VirtualMachine")?
            .with_context(|| format!("VirtualMachine {} not found", self.name_ref()))?;

        let power_state = vm
            .status
            .and_then(|s| s.printable_status)
            .map(|s| PowerState::from_kubevirt(&s))
            .unwrap_or(PowerState::Unknown);

        let address = match power_state {
            PowerState::Running => self
                .vmis()
                .get_opt(self.name_ref())
                .await
                .context("Failed to get VirtualMachineInstance")?
                .as_ref()
                .and_then(vmi_address),
            _ => None,
        };

        Ok(VmStatus {
            name: self.descriptor.name.clone(),
            power_state,
            address,
        })
    }

    async fn exists(&self) -> Result<bool> {
        let vm = self
            .vms()
            .get_opt(self.name_ref())
            .await
            .context("Failed to get VirtualMachine")?;
        Ok(vm.is_some())
    }

    async fn is_stopped(&self) -> Result<bool> {
        Ok(self.show().await?.power_state.is_stopped())
    }

    async fn public_address(&self) -> Result<String> {
        self.show()
            .await?
            .address
            .with_context(|| format!("VirtualMachineInstance {} has no IP yet", self.name_ref()))
    }
}
