//! Azure backend over the `az` CLI

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Account, CloudProvider, PowerState, VmHandle, VmStatus};
use crate::config::AzureConfig;
use crate::models::VmDescriptor;
use crate::session::{RemoteSession, SshConfig, SshSession};

/// Runner for `az` invocations
#[derive(Clone, Debug)]
pub struct AzCli {
    path: String,
}

impl AzCli {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Run `az` with `args` and return its stdout
    pub async fn run(&self, args: &[String]) -> Result<String> {
        // Only the subcommand is logged; later arguments may carry secrets
        let shown: Vec<&str> = args.iter().take(2).map(String::as_str).collect();
        debug!("Running {} {}", self.path, shown.join(" "));

        let output = Command::new(&self.path)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {} {}", self.path, shown.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} {} failed: {}", self.path, shown.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Run `az` and parse its JSON output
    pub async fn run_json<T: DeserializeOwned>(&self, args: &[String]) -> Result<T> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout).context("Failed to parse az output")
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Azure account login
pub struct AzureAccount {
    cli: AzCli,
    config: AzureConfig,
}

impl AzureAccount {
    /// Login arguments; `None` means reuse the CLI's cached login
    fn login_args(&self) -> Option<Vec<String>> {
        match (
            &self.config.client_id,
            &self.config.tenant_id,
            &self.config.client_secret,
        ) {
            (Some(id), Some(tenant), Some(secret)) => Some(strings(&[
                "login",
                "--service-principal",
                "--username",
                id.as_str(),
                "--password",
                secret.as_str(),
                "--tenant",
                tenant.as_str(),
                "--output",
                "none",
            ])),
            _ => None,
        }
    }
}

#[async_trait]
impl Account for AzureAccount {
    async fn login(&self) -> Result<()> {
        match self.login_args() {
            Some(args) => {
                info!("Logging in to Azure with service principal");
                self.cli
                    .run(&args)
                    .await
                    .context("Azure service principal login failed")?;
            }
            None => {
                self.cli
                    .run(&strings(&["account", "show", "--output", "none"]))
                    .await
                    .context("Not logged in to Azure; run `az login` or configure a service principal")?;
            }
        }

        if let Some(ref subscription) = self.config.subscription {
            self.cli
                .run(&strings(&["account", "set", "--subscription", subscription.as_str()]))
                .await
                .with_context(|| format!("Failed to select subscription {subscription}"))?;
        }
        Ok(())
    }
}

/// Azure provider
pub struct AzureProvider {
    cli: AzCli,
    config: AzureConfig,
    ssh: SshConfig,
    account: AzureAccount,
}

impl AzureProvider {
    pub fn new(config: AzureConfig, ssh: SshConfig) -> Self {
        let cli = AzCli::new(config.az_path.clone());
        Self {
            account: AzureAccount {
                cli: cli.clone(),
                config: config.clone(),
            },
            cli,
            config,
            ssh,
        }
    }
}

impl CloudProvider for AzureProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn account(&self) -> &dyn Account {
        &self.account
    }

    fn vm(&self, descriptor: VmDescriptor) -> Arc<dyn VmHandle> {
        Arc::new(AzureVm {
            descriptor,
            cli: self.cli.clone(),
            config: self.config.clone(),
        })
    }

    fn session(&self, vm: Arc<dyn VmHandle>) -> Box<dyn RemoteSession> {
        Box::new(SshSession::new(vm, self.ssh.clone()))
    }
}

/// `az vm show -d` fields the harness reads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmShow {
    name: String,
    #[serde(default)]
    power_state: Option<String>,
    #[serde(default)]
    public_ips: Option<String>,
}

impl From<VmShow> for VmStatus {
    fn from(show: VmShow) -> Self {
        VmStatus {
            name: show.name,
            power_state: show
                .power_state
                .as_deref()
                .map(PowerState::from_azure)
                .unwrap_or(PowerState::Unknown),
            address: show.public_ips.filter(|ip| !ip.is_empty()),
        }
    }
}

/// One VM in the configured resource group
pub struct AzureVm {
    descriptor: VmDescriptor,
    cli: AzCli,
    config: AzureConfig,
}

impl AzureVm {
    /// `az vm <action>` against this VM
    fn vm_args(&self, action: &str) -> Vec<String> {
        strings(&[
            "vm",
            action,
            "--resource-group",
            self.config.resource_group.as_str(),
            "--name",
            self.descriptor.name.as_str(),
        ])
    }

    fn create_args(&self, wait: bool) -> Vec<String> {
        let d = &self.descriptor;
        let mut args = self.vm_args("create");
        args.extend(strings(&[
            "--admin-username",
            d.username.as_str(),
            "--authentication-type",
            d.authentication.as_str(),
        ]));

        if let Some(ref image) = d.image {
            args.extend(strings(&["--image", image.as_str()]));
        }
        if let Some(ref size) = d.size {
            args.extend(strings(&["--size", size.as_str()]));
        }
        if let Some(ref location) = self.config.location {
            args.extend(strings(&["--location", location.as_str()]));
        }
        if d.authentication.allows_password() {
            if let Some(ref password) = d.password {
                args.extend(strings(&["--admin-password", password.as_str()]));
            }
        }
        if d.authentication.allows_public_key() {
            if let Some(ref key) = d.ssh_key_value {
                args.extend(strings(&["--ssh-key-values", key.as_str()]));
            } else if d.generate_ssh_keys {
                args.push("--generate-ssh-keys".to_string());
            }
        }
        if !wait {
            args.push("--no-wait".to_string());
        }
        args.extend(strings(&["--output", "none"]));
        args
    }

    fn delete_args(&self, wait: bool) -> Vec<String> {
        let mut args = self.vm_args("delete");
        args.push("--yes".to_string());
        if !wait {
            args.push("--no-wait".to_string());
        }
        args
    }

    fn list_args(&self) -> Vec<String> {
        let query = format!("[?name=='{}'].name", self.descriptor.name);
        strings(&[
            "vm",
            "list",
            "--resource-group",
            self.config.resource_group.as_str(),
            "--query",
            query.as_str(),
            "--output",
            "json",
        ])
    }

    async fn power_action(&self, action: &str) -> Result<()> {
        let mut args = self.vm_args(action);
        args.extend(strings(&["--output", "none"]));
        self.cli
            .run(&args)
            .await
            .with_context(|| format!("az vm {} {} failed", action, self.descriptor.name))?;
        Ok(())
    }
}

#[async_trait]
impl VmHandle for AzureVm {
    fn descriptor(&self) -> &VmDescriptor {
        &self.descriptor
    }

    async fn create(&self, wait: bool) -> Result<()> {
        info!(
            "Creating Azure VM {} in {}",
            self.descriptor.name, self.config.resource_group
        );
        self.cli.run(&self.create_args(wait)).await?;
        Ok(())
    }

    async fn delete(&self, wait: bool) -> Result<()> {
        info!("Deleting Azure VM {}", self.descriptor.name);
        self.cli.run(&self.delete_args(wait)).await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.power_action("start").await
    }

    async fn stop(&self) -> Result<()> {
        self.power_action("deallocate").await
    }

    async fn reboot(&self) -> Result<()> {
        self.power_action("restart").await
    }

    async fn show(&self) -> Result<VmStatus> {
        let mut args = self.vm_args("show");
        args.extend(strings(&["--show-details", "--output", "json"]));
        let show: VmShow = self
            .cli
            .run_json(&args)
            .await
            .with_context(|| format!("Failed to show VM {}", self.descriptor.name))?;
        Ok(show.into())
    }

    async fn exists(&self) -> Result<bool> {
        let names: Vec<String> = self
            .cli
            .run_json(&self.list_args())
            .await
            .context("Failed to list VMs")?;
        Ok(names.iter().any(|n| *n == self.descriptor.name))
    }

    async fn is_stopped(&self) -> Result<bool> {
        Ok(self.show().await?.power_state.is_stopped())
    }

    async fn public_address(&self) -> Result<String> {
        self.show()
            .await?
            .address
            .with_context(|| format!("VM {} has no public IP", self.descriptor.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthMode;

    fn vm(descriptor: VmDescriptor) -> AzureVm {
        AzureVm {
            descriptor,
            cli: AzCli::new("az"),
            config: AzureConfig::default(),
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_create_args_sshkey() {
        let vm = vm(VmDescriptor::new("wala-vm", "azureuser").ssh_key("ssh-rsa AAAA"));
        let args = vm.create_args(true);

        assert_eq!(&args[..2], &["vm".to_string(), "create".to_string()]);
        assert!(has_pair(&args, "--resource-group", "wala-lifecycle"));
        assert!(has_pair(&args, "--authentication-type", "ssh"));
        assert!(has_pair(&args, "--ssh-key-values", "ssh-rsa AAAA"));
        assert!(has_pair(&args, "--location", "westus2"));
        assert!(!args.contains(&"--generate-ssh-keys".to_string()));
        assert!(!args.contains(&"--no-wait".to_string()));
    }

    #[test]
    fn test_create_args_password() {
        let mut descriptor = VmDescriptor::new("wala-vm-password", "azureuser")
            .password("Secret#1")
            .authentication(AuthMode::Password);
        descriptor.generate_ssh_keys = false;
        let args = vm(descriptor).create_args(false);

        assert!(has_pair(&args, "--authentication-type", "password"));
        assert!(has_pair(&args, "--admin-password", "Secret#1"));
        assert!(!args.contains(&"--generate-ssh-keys".to_string()));
        assert!(args.contains(&"--no-wait".to_string()));
    }

    #[test]
    fn test_create_args_all_generates_keys() {
        let descriptor = VmDescriptor::new("wala-vm-all", "azureuser")
            .password("Secret#1")
            .authentication(AuthMode::All);
        let args = vm(descriptor).create_args(true);

        assert!(has_pair(&args, "--authentication-type", "all"));
        assert!(has_pair(&args, "--admin-password", "Secret#1"));
        assert!(args.contains(&"--generate-ssh-keys".to_string()));
    }

    #[test]
    fn test_delete_args() {
        let vm = vm(VmDescriptor::new("wala-vm", "azureuser"));
        let args = vm.delete_args(false);
        assert_eq!(args[1], "delete");
        assert!(args.contains(&"--yes".to_string()));
        assert!(args.contains(&"--no-wait".to_string()));
        assert!(!vm.delete_args(true).contains(&"--no-wait".to_string()));
    }

    #[test]
    fn test_list_query() {
        let vm = vm(VmDescriptor::new("wala-vm", "azureuser"));
        assert!(has_pair(&vm.list_args(), "--query", "[?name=='wala-vm'].name"));
    }

    #[test]
    fn test_parse_show_output() {
        let json = r#"{"name": "wala-vm", "powerState": "VM deallocated", "publicIps": "", "location": "westus2"}"#;
        let status: VmStatus = serde_json::from_str::<VmShow>(json).unwrap().into();

        assert_eq!(status.power_state, PowerState::Deallocated);
        assert!(status.power_state.is_stopped());
        assert_eq!(status.address, None);

        let json = r#"{"name": "wala-vm", "powerState": "VM running", "publicIps": "20.1.2.3"}"#;
        let status: VmStatus = serde_json::from_str::<VmShow>(json).unwrap().into();
        assert_eq!(status.address.as_deref(), Some("20.1.2.3"));
    }

    #[test]
    fn test_login_args() {
        let mut config = AzureConfig::default();
        let account = AzureAccount {
            cli: AzCli::new("az"),
            config: config.clone(),
        };
        assert!(account.login_args().is_none());

        config.client_id = Some("app-id".to_string());
        config.tenant_id = Some("tenant".to_string());
        config.client_secret = Some("secret".to_string());
        let account = AzureAccount {
            cli: AzCli::new("az"),
            config,
        };
        let args = account.login_args().unwrap();
        assert!(has_pair(&args, "--username", "app-id"));
        assert!(has_pair(&args, "--tenant", "tenant"));
    }
}
