//! SSH sessions over the OpenSSH client
//!
//! Each command runs as its own `ssh` invocation; "connected" records the
//! credential that last logged in successfully. Password logins go through
//! `sshpass`, reading the password from the environment.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::RemoteSession;
use crate::models::SessionAuth;
use crate::provider::VmHandle;

/// Exit code `ssh` uses for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// SSH client configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshConfig {
    /// SSH port
    pub port: u16,

    /// Per-attempt connection timeout in seconds
    pub timeout_secs: u64,

    /// How long `connect` keeps trying before giving up
    pub connect_wait_secs: u64,

    /// Delay between connection attempts in seconds
    pub retry_delay_secs: u64,

    /// Upper bound for a single remote command
    pub command_timeout_secs: u64,

    /// Strict host key checking
    pub strict_host_key_checking: bool,

    /// OpenSSH client binary
    pub ssh_program: String,

    /// sshpass binary used for password logins
    pub sshpass_program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: 22,
            timeout_secs: 30,
            connect_wait_secs: 300,
            retry_delay_secs: 10,
            command_timeout_secs: 120,
            strict_host_key_checking: false,
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
        }
    }
}

impl SshConfig {
    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set connection timeout
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set how long connect waits for SSH
    pub fn connect_wait(mut self, secs: u64) -> Self {
        self.connect_wait_secs = secs;
        self
    }

    /// Set delay between connection attempts
    pub fn retry_delay(mut self, secs: u64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Set upper bound for a single remote command
    pub fn command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Enable or disable strict host key checking
    pub fn strict_host_key_checking(mut self, enabled: bool) -> Self {
        self.strict_host_key_checking = enabled;
        self
    }

    /// Set the client binaries
    pub fn programs(mut self, ssh: impl Into<String>, sshpass: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.sshpass_program = sshpass.into();
        self
    }
}

/// Session against one VM
pub struct SshSession {
    vm: Arc<dyn VmHandle>,
    config: SshConfig,
    host: Option<String>,
    auth: Option<SessionAuth>,
}

impl SshSession {
    /// Create an unconnected session
    pub fn new(vm: Arc<dyn VmHandle>, config: SshConfig) -> Self {
        Self {
            vm,
            config,
            host: None,
            auth: None,
        }
    }

    /// Build the program and arguments for one invocation
    fn build_command(&self, host: &str, auth: SessionAuth) -> (String, Vec<String>) {
        let descriptor = self.vm.descriptor();

        let mut args = vec![
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.config.strict_host_key_checking {
                    "yes"
                } else {
                    "no"
                }
            ),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.timeout_secs),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
        ];

        match auth {
            SessionAuth::PublicKey => {
                args.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "PreferredAuthentications=publickey".to_string(),
                ]);
                if let Some(ref key_path) = descriptor.private_key_path {
                    args.push("-i".to_string());
                    args.push(key_path.to_string_lossy().to_string());
                }
            }
            SessionAuth::Password => {
                args.extend([
                    "-o".to_string(),
                    "PreferredAuthentications=password".to_string(),
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                    "-o".to_string(),
                    "NumberOfPasswordPrompts=1".to_string(),
                ]);
            }
        }

        args.push(format!("{}@{}", descriptor.username, host));

        match auth {
            SessionAuth::PublicKey => (self.config.ssh_program.clone(), args),
            SessionAuth::Password => {
                let mut wrapped = vec!["-e".to_string(), self.config.ssh_program.clone()];
                wrapped.extend(args);
                (self.config.sshpass_program.clone(), wrapped)
            }
        }
    }

    fn command(&self, host: &str, auth: SessionAuth, remote: &str) -> Command {
        let (program, mut args) = self.build_command(host, auth);
        args.push(remote.to_string());

        let mut cmd = Command::new(program);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        if auth == SessionAuth::Password {
            if let Some(ref password) = self.vm.descriptor().password {
                cmd.env("SSHPASS", password);
            }
        }
        cmd
    }

    /// Try one login with `auth`.
    ///
    /// `Ok(false)` means the client ran and the login did not succeed; a
    /// client that cannot be spawned is an error.
    async fn test_connection(&self, host: &str, auth: SessionAuth) -> Result<bool> {
        debug!(
            "Testing SSH connection to {}@{} ({})",
            self.vm.descriptor().username,
            host,
            auth
        );

        let output = self
            .command(host, auth, "echo connected")
            .output()
            .await
            .with_context(|| {
                let program = match auth {
                    SessionAuth::PublicKey => &self.config.ssh_program,
                    SessionAuth::Password => &self.config.sshpass_program,
                };
                format!("Failed to execute SSH client '{program}'")
            })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout.trim() == "connected")
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("SSH connection test failed: {}", stderr.trim());
            Ok(false)
        }
    }

    fn live(&self) -> Result<(&str, SessionAuth)> {
        match (self.host.as_deref(), self.auth) {
            (Some(host), Some(auth)) => Ok((host, auth)),
            _ => anyhow::bail!("Session to {} is not connected", self.vm.name()),
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn connect(&mut self, auth: SessionAuth) -> Result<bool> {
        if auth == SessionAuth::Password && self.vm.descriptor().password.is_none() {
            warn!(
                "Password login requested for {} but no password is configured",
                self.vm.name()
            );
            return Ok(false);
        }

        let start = Instant::now();
        let wait = Duration::from_secs(self.config.connect_wait_secs);

        info!(
            "Connecting to {} with {} (timeout: {}s)",
            self.vm.name(),
            auth,
            self.config.connect_wait_secs
        );

        loop {
            // The address can change across stop/start, so resolve it per attempt.
            match self.vm.public_address().await {
                Ok(host) => {
                    if self.test_connection(&host, auth).await? {
                        info!("Logged in to {} ({}) with {}", self.vm.name(), host, auth);
                        self.host = Some(host);
                        self.auth = Some(auth);
                        return Ok(true);
                    }
                }
                Err(e) => debug!("No address for {} yet: {:#}", self.vm.name(), e),
            }

            if start.elapsed() > wait {
                warn!("Timeout waiting for SSH on {}", self.vm.name());
                return Ok(false);
            }

            debug!(
                "SSH not yet available, retrying in {}s...",
                self.config.retry_delay_secs
            );
            sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
        }
    }

    async fn cmd_output(&self, command: &str) -> Result<String> {
        let (host, auth) = self.live()?;
        debug!("Executing SSH command on {}: {}", host, command);

        let output = timeout(
            Duration::from_secs(self.config.command_timeout_secs),
            self.command(host, auth, command).output(),
        )
        .await
        .with_context(|| format!("SSH command timed out: {command}"))?
        .context("Failed to execute SSH command")?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if exit_code == SSH_ERROR_EXIT {
            anyhow::bail!("SSH connection to {host} failed: {}", stderr.trim());
        }
        if exit_code != 0 {
            debug!("Command exited with {}: {}", exit_code, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string())
    }

    async fn send_line(&self, command: &str) -> Result<()> {
        let (host, auth) = self.live()?;
        let command = command.trim();
        debug!("Sending to {}: {}", host, command);

        let mut child = self
            .command(host, auth, command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to execute SSH command")?;

        // A reboot tears the connection down, so the exit status means nothing.
        if timeout(Duration::from_secs(self.config.timeout_secs), child.wait())
            .await
            .is_err()
        {
            debug!("'{}' still running on {}, detaching", command, host);
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.auth.take().is_some() {
            debug!("Closed session to {}", self.vm.name());
        }
        self.host = None;
    }

    fn connected_as(&self) -> Option<SessionAuth> {
        self.auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VmDescriptor;
    use crate::provider::VmStatus;

    struct StaticVm(VmDescriptor);

    #[async_trait]
    impl VmHandle for StaticVm {
        fn descriptor(&self) -> &VmDescriptor {
            &self.0
        }
        async fn create(&self, _wait: bool) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _wait: bool) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn reboot(&self) -> Result<()> {
            Ok(())
        }
        async fn show(&self) -> Result<VmStatus> {
            anyhow::bail!("not used")
        }
        async fn exists(&self) -> Result<bool> {
            Ok(true)
        }
        async fn is_stopped(&self) -> Result<bool> {
            Ok(false)
        }
        async fn public_address(&self) -> Result<String> {
            Ok("192.0.2.10".to_string())
        }
    }

    fn session(descriptor: VmDescriptor) -> SshSession {
        SshSession::new(
            Arc::new(StaticVm(descriptor)),
            SshConfig::default().port(2222).timeout(15),
        )
    }

    #[test]
    fn test_ssh_config_builder() {
        let config = SshConfig::default()
            .port(2222)
            .timeout(60)
            .connect_wait(600)
            .retry_delay(5)
            .command_timeout(30)
            .strict_host_key_checking(true)
            .programs("/usr/local/bin/ssh", "/usr/local/bin/sshpass");

        assert_eq!(config.port, 2222);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.connect_wait_secs, 600);
        assert_eq!(config.retry_delay_secs, 5);
        assert_eq!(config.command_timeout_secs, 30);
        assert!(config.strict_host_key_checking);
        assert_eq!(config.ssh_program, "/usr/local/bin/ssh");
        assert_eq!(config.sshpass_program, "/usr/local/bin/sshpass");
    }

    #[test]
    fn test_public_key_command() {
        let session =
            session(VmDescriptor::new("wala-vm", "azureuser").private_key("/keys/id_rsa"));
        let (program, args) = session.build_command("192.0.2.10", SessionAuth::PublicKey);

        assert_eq!(program, "ssh");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"ConnectTimeout=15".to_string()));
        assert!(args.contains(&"/keys/id_rsa".to_string()));
        assert_eq!(args.last().unwrap(), "azureuser@192.0.2.10");
    }

    #[test]
    fn test_password_command_uses_sshpass() {
        let session = session(VmDescriptor::new("wala-vm", "azureuser").password("Secret#1"));
        let (program, args) = session.build_command("192.0.2.10", SessionAuth::Password);

        assert_eq!(program, "sshpass");
        assert_eq!(&args[..2], &["-e".to_string(), "ssh".to_string()]);
        assert!(args.contains(&"PubkeyAuthentication=no".to_string()));
        assert!(!args.contains(&"BatchMode=yes".to_string()));
        assert!(!args.iter().any(|a| a.contains("Secret#1")));
    }

    #[tokio::test]
    async fn test_password_connect_without_password_is_refused() {
        let mut session = session(VmDescriptor::new("wala-vm", "azureuser"));
        assert!(!session.connect(SessionAuth::Password).await.unwrap());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_missing_client_is_an_error() {
        let mut session = SshSession::new(
            Arc::new(StaticVm(
                VmDescriptor::new("wala-vm", "azureuser").password("Secret#1"),
            )),
            SshConfig::default()
                .connect_wait(600)
                .programs("/nonexistent/wala-ssh", "/nonexistent/wala-sshpass"),
        );

        let err = session.connect(SessionAuth::Password).await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/wala-sshpass"));
        assert!(!session.is_connected());

        let err = session.connect(SessionAuth::PublicKey).await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/wala-ssh"));
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let session = session(VmDescriptor::new("wala-vm", "azureuser"));
        assert!(session.cmd_output("whoami").await.is_err());
        assert!(session.send_line("sudo reboot").await.is_err());
    }
}
