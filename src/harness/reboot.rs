//! Reboot detection by boot marker diff

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use super::error::ScenarioError;
use super::retry::Sleeper;
use crate::provider::VmHandle;
use crate::session::RemoteSession;

/// Prints the boot history
pub const BOOT_MARKER_COMMAND: &str = "last reboot";

/// Command sent to reboot from inside the guest
pub const GUEST_REBOOT_COMMAND: &str = "sudo reboot";

/// Snapshot of the guest's boot history
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootMarker(String);

impl BootMarker {
    pub async fn capture(session: &dyn RemoteSession) -> Result<Self> {
        let output = session
            .cmd_output(BOOT_MARKER_COMMAND)
            .await
            .context("Failed to read boot history")?;
        Ok(Self(output))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How the reboot is triggered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebootKind {
    /// Through the provider API
    Restart,
    /// `sudo reboot` inside the guest
    GuestReboot,
}

impl RebootKind {
    fn login_failure(&self) -> &'static str {
        match self {
            RebootKind::Restart => "Cannot login after rebooting VM",
            RebootKind::GuestReboot => "Cannot login after reboot inside VM",
        }
    }

    fn not_rebooted(&self) -> &'static str {
        match self {
            RebootKind::Restart => "VM is not restarted.",
            RebootKind::GuestReboot => "VM is not rebooted.",
        }
    }
}

/// Fail when the boot marker did not change
pub fn verify_rebooted(
    before: &BootMarker,
    after: &BootMarker,
    kind: RebootKind,
) -> Result<(), ScenarioError> {
    if before == after {
        Err(ScenarioError::NotRebooted(kind.not_rebooted().to_string()))
    } else {
        Ok(())
    }
}

/// Reboot the VM and confirm the guest actually went down.
///
/// `session` must be connected on entry and is left connected with the
/// VM's default credential on success. `delay` only applies to
/// [`RebootKind::GuestReboot`].
pub async fn reboot_and_verify(
    vm: &dyn VmHandle,
    session: &mut dyn RemoteSession,
    kind: RebootKind,
    delay: Duration,
    sleeper: &dyn Sleeper,
) -> Result<()> {
    let before = BootMarker::capture(&*session).await?;
    debug!("Boot history before reboot:\n{}", before.as_str());

    match kind {
        RebootKind::Restart => {
            info!("Restarting VM {}", vm.name());
            vm.reboot().await?;
        }
        RebootKind::GuestReboot => {
            info!("Rebooting VM {} from inside the guest", vm.name());
            session
                .send_line(GUEST_REBOOT_COMMAND)
                .await
                .context("Failed to send reboot command")?;
        }
    }
    session.close().await;

    if kind == RebootKind::GuestReboot {
        debug!("Waiting {:?} before reconnecting", delay);
        sleeper.sleep(delay).await;
    }

    let auth = vm.descriptor().authentication.default_session_auth();
    if !session.connect(auth).await? {
        return Err(ScenarioError::LoginFailed(kind.login_failure().to_string()).into());
    }

    let after = BootMarker::capture(&*session).await?;
    verify_rebooted(&before, &after, kind)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::fakes::FakeWorld;
    use crate::harness::retry::tests::RecordingSleeper;
    use crate::models::SessionAuth;

    fn marker(s: &str) -> BootMarker {
        BootMarker(s.to_string())
    }

    #[test]
    fn test_verify_rebooted() {
        assert!(verify_rebooted(&marker("a"), &marker("b"), RebootKind::Restart).is_ok());
        assert_eq!(
            verify_rebooted(&marker("a"), &marker("a"), RebootKind::Restart),
            Err(ScenarioError::NotRebooted("VM is not restarted.".to_string()))
        );
        assert_eq!(
            verify_rebooted(&marker(""), &marker(""), RebootKind::GuestReboot),
            Err(ScenarioError::NotRebooted("VM is not rebooted.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_restart_detected() {
        let world = FakeWorld::new();
        let vm = world.running_vm("wala-vm");
        let mut session = world.session_for(&vm);
        assert!(session.connect(SessionAuth::PublicKey).await.unwrap());
        let sleeper = RecordingSleeper::default();

        reboot_and_verify(
            vm.as_ref(),
            &mut session,
            RebootKind::Restart,
            Duration::from_secs(20),
            &sleeper,
        )
        .await
        .unwrap();

        assert!(session.connected_as().is_some());
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_guest_reboot_waits_before_reconnect() {
        let world = FakeWorld::new();
        let vm = world.running_vm("wala-vm");
        let mut session = world.session_for(&vm);
        assert!(session.connect(SessionAuth::PublicKey).await.unwrap());
        let sleeper = RecordingSleeper::default();

        reboot_and_verify(
            vm.as_ref(),
            &mut session,
            RebootKind::GuestReboot,
            Duration::from_secs(20),
            &sleeper,
        )
        .await
        .unwrap();

        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(20)]);
        assert_eq!(world.count(GUEST_REBOOT_COMMAND), 1);
    }

    #[tokio::test]
    async fn test_unchanged_marker_fails() {
        let world = FakeWorld::new();
        world.set_reboot_takes_effect(false);
        let vm = world.running_vm("wala-vm");
        let mut session = world.session_for(&vm);
        assert!(session.connect(SessionAuth::PublicKey).await.unwrap());

        let err = reboot_and_verify(
            vm.as_ref(),
            &mut session,
            RebootKind::GuestReboot,
            Duration::from_secs(20),
            &RecordingSleeper::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ScenarioError>(),
            Some(&ScenarioError::NotRebooted("VM is not rebooted.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_login_failure_after_restart() {
        let world = FakeWorld::new();
        let vm = world.running_vm("wala-vm");
        let mut session = world.session_for(&vm);
        assert!(session.connect(SessionAuth::PublicKey).await.unwrap());
        world.set_refuse_logins(true);

        let err = reboot_and_verify(
            vm.as_ref(),
            &mut session,
            RebootKind::Restart,
            Duration::from_secs(20),
            &RecordingSleeper::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ScenarioError>(),
            Some(&ScenarioError::LoginFailed(
                "Cannot login after rebooting VM".to_string()
            ))
        );
    }
}
