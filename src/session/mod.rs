//! Remote shell sessions
//!
//! A [`RemoteSession`] is bound to one VM and, while connected, to one
//! credential. Switching credentials takes an explicit `close` + `connect`.

mod ssh;

pub use ssh::{SshConfig, SshSession};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::SessionAuth;

#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Log in with `auth`; `Ok(false)` means the login was refused or timed out
    async fn connect(&mut self, auth: SessionAuth) -> Result<bool>;

    /// Run `command` and return its stdout with trailing whitespace removed
    async fn cmd_output(&self, command: &str) -> Result<String>;

    /// Send `command` without collecting its output
    async fn send_line(&self, command: &str) -> Result<()>;

    async fn close(&mut self);

    /// Credential of the live connection, if any
    fn connected_as(&self) -> Option<SessionAuth>;

    fn is_connected(&self) -> bool {
        self.connected_as().is_some()
    }
}
