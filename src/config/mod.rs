//! Configuration module
//!
//! Handles loading, validating and overriding the harness configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{expand_path, find_config, is_yaml_file};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harness::{ReleaseVersion, RetryBudget};
use crate::models::{AuthMode, Scenario, VmDescriptor};
use crate::session::SshConfig;

/// Harness configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Version of config file format
    pub version: String,

    /// Cloud backend
    pub provider: ProviderConfig,

    /// The VM every scenario works against
    pub vm: VmConfig,

    /// Remote session settings
    pub session: SessionConfig,

    /// Swap recovery check
    pub swap: SwapConfig,

    /// Reboot detection
    pub reboot: RebootConfig,

    /// Scenarios reported as skipped
    pub skip: Vec<String>,
}

impl HarnessConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        if config.version.is_empty() {
            config.version = default_version();
        }
        Ok(config)
    }

    /// Load from `path`, or from the first standard location that exists
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let found = path.map(Path::to_path_buf).or_else(find_config);
        match found {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }
        if self.vm.name.trim().is_empty() {
            anyhow::bail!("vm.name must not be empty");
        }
        if self.vm.username.trim().is_empty() {
            anyhow::bail!("vm.username must not be empty");
        }
        if self.vm.authentication.allows_password() && self.vm.password.is_none() {
            anyhow::bail!(
                "vm.password is required for authentication '{}'",
                self.vm.authentication
            );
        }
        if self.provider.kind == ProviderKind::Kubevirt
            && self.vm.authentication.allows_public_key()
            && self.vm.ssh_public_key_path.is_none()
        {
            anyhow::bail!(
                "vm.ssh_public_key_path is required for '{}' authentication on kubevirt",
                self.vm.authentication
            );
        }
        if self.swap.attempts == 0 {
            anyhow::bail!("swap.attempts must be at least 1");
        }
        ReleaseVersion::parse(&self.swap.legacy_below_version).with_context(|| {
            format!(
                "Invalid swap.legacy_below_version: {}",
                self.swap.legacy_below_version
            )
        })?;
        for name in &self.skip {
            if Scenario::from_name(name).is_none() {
                anyhow::bail!("Unknown scenario in skip list: {name}");
            }
        }
        Ok(())
    }

    /// Scenarios named in the skip list
    pub fn skipped_scenarios(&self) -> Vec<Scenario> {
        self.skip
            .iter()
            .filter_map(|name| Scenario::from_name(name))
            .collect()
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut config = Self::default();
        config.vm.ssh_private_key_path = Some(PathBuf::from("~/.ssh/id_rsa"));
        config
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            provider: ProviderConfig::default(),
            vm: VmConfig::default(),
            session: SessionConfig::default(),
            swap: SwapConfig::default(),
            reboot: RebootConfig::default(),
            skip: Vec::new(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Supported backends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Azure,
    Kubevirt,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "azure" | "az" => Some(ProviderKind::Azure),
            "kubevirt" | "kv" => Some(ProviderKind::Kubevirt),
            _ => None,
        }
    }
}

/// Provider selection and per-backend settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub azure: AzureConfig,
    pub kubevirt: KubeVirtConfig,
}

/// Azure CLI settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Resource group holding the test VMs
    pub resource_group: String,

    /// Region for new VMs
    pub location: Option<String>,

    /// Subscription to select after login
    pub subscription: Option<String>,

    /// Service principal application ID
    pub client_id: Option<String>,

    /// Service principal tenant
    pub tenant_id: Option<String>,

    /// Service principal secret, only ever read from the environment
    #[serde(skip)]
    pub client_secret: Option<String>,

    /// Path to the az executable
    pub az_path: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            resource_group: "wala-lifecycle".to_string(),
            location: Some("westus2".to_string()),
            subscription: None,
            client_id: None,
            tenant_id: None,
            client_secret: None,
            az_path: "az".to_string(),
        }
    }
}

/// KubeVirt settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeVirtConfig {
    /// Namespace for VMs
    pub namespace: String,

    /// Container disk image used when the VM has none
    pub image: String,

    /// VM CPU cores
    pub cpu_cores: u32,

    /// VM memory
    pub memory: String,

    /// How long create/start/stop wait for the VM to settle
    pub ready_timeout_secs: u64,
}

impl Default for KubeVirtConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "quay.io/containerdisks/centos-stream:9".to_string(),
            cpu_cores: 1,
            memory: "2Gi".to_string(),
            ready_timeout_secs: 300,
        }
    }
}

/// The VM under test
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub name: String,
    pub username: String,

    /// Admin password; prefer WALA_LIFECYCLE_PASSWORD over the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub authentication: AuthMode,
    pub generate_ssh_keys: bool,

    /// Public key installed for the admin user
    pub ssh_public_key_path: Option<PathBuf>,

    /// Private key sessions log in with
    pub ssh_private_key_path: Option<PathBuf>,

    pub size: Option<String>,
    pub image: Option<String>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            name: "wala-lifecycle-vm".to_string(),
            username: "azureuser".to_string(),
            password: None,
            authentication: AuthMode::Sshkey,
            generate_ssh_keys: true,
            ssh_public_key_path: None,
            ssh_private_key_path: None,
            size: Some("Standard_DS1_v2".to_string()),
            image: Some("RedHat:RHEL:7-RAW:latest".to_string()),
        }
    }
}

impl VmConfig {
    /// Build the base descriptor scenarios start from
    pub fn to_descriptor(&self) -> Result<VmDescriptor> {
        let ssh_key_value = match &self.ssh_public_key_path {
            Some(path) => {
                let path = expand_path(&path.to_string_lossy());
                let key = std::fs::read_to_string(&path).with_context(|| {
                    format!("Failed to read SSH public key: {}", path.display())
                })?;
                Some(key.trim().to_string())
            }
            None => None,
        };

        let mut descriptor =
            VmDescriptor::new(&self.name, &self.username).authentication(self.authentication);
        if let Some(password) = &self.password {
            descriptor = descriptor.password(password);
        }
        if let Some(key) = ssh_key_value {
            descriptor = descriptor.ssh_key(key);
        }
        if let Some(path) = &self.ssh_private_key_path {
            descriptor = descriptor.private_key(expand_path(&path.to_string_lossy()));
        }
        descriptor.generate_ssh_keys = self.generate_ssh_keys;
        descriptor.size = self.size.clone();
        descriptor.image = self.image.clone();
        Ok(descriptor)
    }
}

/// Remote session settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub connect_wait_secs: u64,
    pub retry_delay_secs: u64,
    pub command_timeout_secs: u64,
    pub strict_host_key_checking: bool,
    pub ssh_program: String,
    pub sshpass_program: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let ssh = SshConfig::default();
        Self {
            port: ssh.port,
            connect_timeout_secs: ssh.timeout_secs,
            connect_wait_secs: ssh.connect_wait_secs,
            retry_delay_secs: ssh.retry_delay_secs,
            command_timeout_secs: ssh.command_timeout_secs,
            strict_host_key_checking: ssh.strict_host_key_checking,
            ssh_program: ssh.ssh_program,
            sshpass_program: ssh.sshpass_program,
        }
    }
}

impl SessionConfig {
    pub fn ssh_config(&self) -> SshConfig {
        SshConfig::default()
            .port(self.port)
            .timeout(self.connect_timeout_secs)
            .connect_wait(self.connect_wait_secs)
            .retry_delay(self.retry_delay_secs)
            .command_timeout(self.command_timeout_secs)
            .strict_host_key_checking(self.strict_host_key_checking)
            .programs(
                expand_path(&self.ssh_program).to_string_lossy(),
                expand_path(&self.sshpass_program).to_string_lossy(),
            )
    }
}

/// Swap recovery check after a restart
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// Swap size `free -m` must report once swap is back
    pub expected_size_mb: u32,

    /// Number of polls
    pub attempts: u32,

    /// Delay between polls in seconds
    pub interval_secs: u64,

    /// Swap device on current releases
    pub device: String,

    /// Swap device on releases older than `legacy_below_version`
    pub legacy_device: String,

    pub legacy_below_version: String,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            expected_size_mb: 2047,
            attempts: 10,
            interval_secs: 10,
            device: "/dev/mapper/rhel-swap".to_string(),
            legacy_device: "/dev/mapper/VolGroup-lv_swap".to_string(),
            legacy_below_version: "7.0".to_string(),
        }
    }
}

impl SwapConfig {
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.attempts, Duration::from_secs(self.interval_secs))
    }
}

/// Reboot detection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebootConfig {
    /// Wait after an in-guest reboot before reconnecting
    pub guest_reboot_delay_secs: u64,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            guest_reboot_delay_secs: 20,
        }
    }
}

impl RebootConfig {
    pub fn guest_reboot_delay(&self) -> Duration {
        Duration::from_secs(self.guest_reboot_delay_secs)
    }
}
