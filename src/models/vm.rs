//! VM descriptor models
//!
//! Describes the VM a scenario works against and how sessions authenticate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How the VM is provisioned for login
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Sshkey,
    Password,
    All,
}

impl AuthMode {
    /// Name used by the provider tooling
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Sshkey => "ssh",
            AuthMode::Password => "password",
            AuthMode::All => "all",
        }
    }

    /// Credential a session uses when a scenario does not pick one
    pub fn default_session_auth(&self) -> SessionAuth {
        match self {
            AuthMode::Password => SessionAuth::Password,
            AuthMode::Sshkey | AuthMode::All => SessionAuth::PublicKey,
        }
    }

    pub fn allows_password(&self) -> bool {
        matches!(self, AuthMode::Password | AuthMode::All)
    }

    pub fn allows_public_key(&self) -> bool {
        matches!(self, AuthMode::Sshkey | AuthMode::All)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Sshkey => write!(f, "sshkey"),
            AuthMode::Password => write!(f, "password"),
            AuthMode::All => write!(f, "all"),
        }
    }
}

/// Credential used by a single session connect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAuth {
    PublicKey,
    Password,
}

impl fmt::Display for SessionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionAuth::PublicKey => write!(f, "publickey"),
            SessionAuth::Password => write!(f, "password"),
        }
    }
}

/// One named VM and the credentials it is provisioned with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDescriptor {
    /// VM name, unique within the provider scope
    pub name: String,

    /// Admin username created in the guest
    pub username: String,

    /// Admin password, required for password logins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Authentication mode the VM is created with
    #[serde(default)]
    pub authentication: AuthMode,

    /// Let the provider generate a key pair when no key is given
    #[serde(default)]
    pub generate_ssh_keys: bool,

    /// Public key material installed for the admin user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_value: Option<String>,

    /// Private key used by sessions for public key logins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,

    /// Provider size/flavor hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Provider image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl VmDescriptor {
    /// Create a descriptor with key authentication
    pub fn new(name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            password: None,
            authentication: AuthMode::Sshkey,
            generate_ssh_keys: true,
            ssh_key_value: None,
            private_key_path: None,
            size: None,
            image: None,
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set authentication mode
    pub fn authentication(mut self, mode: AuthMode) -> Self {
        self.authentication = mode;
        self
    }

    /// Set public key material
    pub fn ssh_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_key_value = Some(key.into());
        self
    }

    /// Set private key path
    pub fn private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Expected sudoers entry for a passwordless sudo user
    pub fn nopasswd_sudoers_line(&self) -> String {
        format!("{} ALL=(ALL) NOPASSWD: ALL", self.username)
    }

    /// Expected sudoers entry for a password sudo user
    pub fn password_sudoers_line(&self) -> String {
        format!("{} ALL=(ALL) ALL", self.username)
    }
}
