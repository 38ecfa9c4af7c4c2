//! Scenario bodies
//!
//! Each body performs one lifecycle action against a prepared
//! [`ScenarioContext`] and asserts its post-conditions.

use anyhow::{Context, Result};
use tracing::info;

use super::error::{ensure_contains, ensure_eq, ScenarioError};
use super::reboot::{reboot_and_verify, RebootKind};
use super::retry::Sleeper;
use super::setup::ScenarioContext;
use super::swap::{disable_swap, wait_for_swap};
use crate::config::{RebootConfig, SwapConfig};
use crate::models::{Scenario, SessionAuth};

/// Path of the sudoers drop-in the guest agent writes
pub const SUDOERS_FILE: &str = "/etc/sudoers.d/waagent";

/// Knobs the scenario bodies read
#[derive(Clone, Debug, Default)]
pub struct ScenarioSettings {
    pub swap: SwapConfig,
    pub reboot: RebootConfig,
}

/// Run the body of `scenario`
pub async fn run_body(
    scenario: Scenario,
    ctx: &mut ScenarioContext,
    settings: &ScenarioSettings,
    sleeper: &dyn Sleeper,
) -> Result<()> {
    match scenario {
        Scenario::CreateVmSshkey => create_vm_sshkey(ctx).await,
        Scenario::CreateVmPassword => create_vm_password(ctx).await,
        Scenario::CreateVmAll => create_vm_all(ctx).await,
        Scenario::StartVm => start_vm(ctx).await,
        Scenario::StopVm => stop_vm(ctx).await,
        Scenario::RestartVm => restart_vm(ctx, settings, sleeper).await,
        Scenario::RebootVmInsideGuest => reboot_vm_inside_guest(ctx, settings, sleeper).await,
        Scenario::DeleteVm => delete_vm(ctx).await,
    }
}

async fn login(ctx: &mut ScenarioContext, auth: SessionAuth, message: &str) -> Result<()> {
    if ctx.session.connect(auth).await? {
        Ok(())
    } else {
        Err(ScenarioError::LoginFailed(message.to_string()).into())
    }
}

/// Quote `value` for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn password_sudo_command(password: &str) -> String {
    format!(
        "printf '%s\\n' {}|sudo -S \"cat\" {SUDOERS_FILE}",
        shell_quote(password)
    )
}

/// Read the sudoers drop-in with password sudo
async fn read_sudoers_with_password(ctx: &ScenarioContext) -> Result<String> {
    let password = ctx
        .descriptor()
        .password
        .as_deref()
        .context("VM has no password configured")?;
    ctx.session
        .cmd_output(&password_sudo_command(password))
        .await
        .context("Failed to read sudoers file")
}

async fn create_vm_sshkey(ctx: &mut ScenarioContext) -> Result<()> {
    login(ctx, SessionAuth::PublicKey, "Fail to login through sshkey").await?;

    let expected = ctx.descriptor().nopasswd_sudoers_line();
    let actual = ctx
        .session
        .cmd_output(&format!("sudo cat {SUDOERS_FILE}"))
        .await
        .context("Failed to read sudoers file")?;
    ensure_eq("Wrong sudoer permission", &expected, &actual)?;
    Ok(())
}

async fn create_vm_password(ctx: &mut ScenarioContext) -> Result<()> {
    login(ctx, SessionAuth::Password, "Fail to login through password").await?;

    let expected = ctx.descriptor().password_sudoers_line();
    let actual = read_sudoers_with_password(ctx).await?;
    ensure_contains("Wrong sudoer permission", &expected, &actual)?;
    Ok(())
}

async fn create_vm_all(ctx: &mut ScenarioContext) -> Result<()> {
    login(ctx, SessionAuth::Password, "Fail to login through password").await?;
    ctx.session.close().await;
    login(ctx, SessionAuth::PublicKey, "Fail to login through sshkey").await?;

    let expected = ctx.descriptor().password_sudoers_line();
    let actual = read_sudoers_with_password(ctx).await?;
    ensure_contains("Wrong sudoer permission", &expected, &actual)?;
    Ok(())
}

async fn start_vm(ctx: &mut ScenarioContext) -> Result<()> {
    ctx.vm.start().await.context("Failed to start VM")?;
    let status = ctx.vm.show().await?;
    info!("VM {} is {}", status.name, status.power_state);

    let auth = ctx.descriptor().authentication.default_session_auth();
    login(ctx, auth, "Fail to login after starting VM").await?;

    let username = ctx.descriptor().username.clone();
    let whoami = ctx.session.cmd_output("whoami").await?;
    ensure_eq(
        "Start VM error: output of cmd `whoami` unexpected",
        &username,
        &whoami,
    )?;
    Ok(())
}

async fn stop_vm(ctx: &mut ScenarioContext) -> Result<()> {
    ctx.vm.stop().await.context("Failed to stop VM")?;
    let status = ctx.vm.show().await?;

    if !ctx.vm.is_stopped().await? {
        return Err(ScenarioError::Assertion {
            message: "Stop VM error: VM status is not Stopped(deallocated)".to_string(),
            expected: "Stopped".to_string(),
            actual: status.power_state.to_string(),
        }
        .into());
    }
    Ok(())
}

async fn delete_vm(ctx: &mut ScenarioContext) -> Result<()> {
    ctx.session.close().await;
    ctx.vm.delete(true).await.context("Failed to delete VM")?;

    if ctx.vm.exists().await? {
        return Err(ScenarioError::Assertion {
            message: "Delete VM error: VM still exists".to_string(),
            expected: "absent".to_string(),
            actual: "present".to_string(),
        }
        .into());
    }
    Ok(())
}

async fn restart_vm(
    ctx: &mut ScenarioContext,
    settings: &ScenarioSettings,
    sleeper: &dyn Sleeper,
) -> Result<()> {
    reboot_and_verify(
        ctx.vm.as_ref(),
        ctx.session.as_mut(),
        RebootKind::Restart,
        settings.reboot.guest_reboot_delay(),
        sleeper,
    )
    .await?;

    let device = disable_swap(ctx.session.as_ref(), &settings.swap).await?;
    info!("Swap turned off on {}, waiting for it to come back", device);
    let attempt = wait_for_swap(ctx.session.as_ref(), &settings.swap, sleeper).await?;
    info!("Swap restored after {} attempt(s)", attempt);
    Ok(())
}

async fn reboot_vm_inside_guest(
    ctx: &mut ScenarioContext,
    settings: &ScenarioSettings,
    sleeper: &dyn Sleeper,
) -> Result<()> {
    reboot_and_verify(
        ctx.vm.as_ref(),
        ctx.session.as_mut(),
        RebootKind::GuestReboot,
        settings.reboot.guest_reboot_delay(),
        sleeper,
    )
    .await
}
