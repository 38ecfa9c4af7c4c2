//! Scenario setup
//!
//! Turns a [`SetupPlan`] into a VM handle and a session.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{CreatePlan, SetupPlan, VmDescriptor};
use crate::provider::{CloudProvider, VmHandle};
use crate::session::RemoteSession;

/// What a scenario body works with
pub struct ScenarioContext {
    pub vm: Arc<dyn VmHandle>,
    pub session: Box<dyn RemoteSession>,
}

impl ScenarioContext {
    pub fn descriptor(&self) -> &VmDescriptor {
        self.vm.descriptor()
    }
}

/// Descriptor a plan works against, derived from the configured VM
pub fn descriptor_for(plan: &SetupPlan, base: &VmDescriptor) -> VmDescriptor {
    let mut descriptor = base.clone();

    if let SetupPlan::Create(create) = plan {
        if let Some(suffix) = create.name_suffix {
            descriptor.name = format!("{}{}", base.name, suffix);
        }
        descriptor = descriptor.authentication(create.authentication);
        if let Some(generate) = create.generate_ssh_keys {
            descriptor.generate_ssh_keys = generate;
        }
        if create.clear_ssh_key {
            descriptor.ssh_key_value = None;
        }
    }

    descriptor
}

/// Log in and run `plan`
pub async fn prepare(
    provider: &dyn CloudProvider,
    base: &VmDescriptor,
    plan: &SetupPlan,
) -> Result<ScenarioContext> {
    provider
        .account()
        .login()
        .await
        .context("Failed to log in to the cloud account")?;

    let vm = provider.vm(descriptor_for(plan, base));

    match plan {
        SetupPlan::Create(create) => create_fresh(provider, vm, create).await,
        SetupPlan::EnsureConnectable {
            pre_delete,
            pre_stop,
        } => ensure_connectable(provider, vm, *pre_delete, *pre_stop).await,
    }
}

async fn create_fresh(
    provider: &dyn CloudProvider,
    vm: Arc<dyn VmHandle>,
    plan: &CreatePlan,
) -> Result<ScenarioContext> {
    let descriptor = vm.descriptor();
    if descriptor.authentication.allows_password() && descriptor.password.is_none() {
        anyhow::bail!(
            "VM {} uses {} authentication but no password is configured",
            descriptor.name,
            descriptor.authentication
        );
    }

    if plan.replace_existing && vm.exists().await? {
        info!("Deleting existing VM {}", vm.name());
        vm.delete(true)
            .await
            .with_context(|| format!("Failed to delete existing VM {}", vm.name()))?;
    }

    info!(
        "Creating VM {} with {} authentication",
        vm.name(),
        descriptor.authentication
    );
    vm.create(plan.wait)
        .await
        .with_context(|| format!("Failed to create VM {}", vm.name()))?;

    let session = provider.session(vm.clone());
    Ok(ScenarioContext { vm, session })
}

/// Make sure the VM exists and is reachable.
///
/// With `pre_stop` the VM is left stopped and the session unconnected.
pub async fn ensure_connectable(
    provider: &dyn CloudProvider,
    vm: Arc<dyn VmHandle>,
    pre_delete: bool,
    pre_stop: bool,
) -> Result<ScenarioContext> {
    if pre_delete && vm.exists().await? {
        info!("Deleting VM {} before setup", vm.name());
        vm.delete(true)
            .await
            .with_context(|| format!("Failed to delete VM {}", vm.name()))?;
    }

    if !vm.exists().await? {
        info!("VM {} not found, creating it", vm.name());
        vm.create(true)
            .await
            .with_context(|| format!("Failed to create VM {}", vm.name()))?;
    }

    if pre_stop {
        info!("Stopping VM {} before the scenario", vm.name());
        vm.stop()
            .await
            .with_context(|| format!("Failed to stop VM {}", vm.name()))?;
        let session = provider.session(vm.clone());
        return Ok(ScenarioContext { vm, session });
    }

    if vm.is_stopped().await? {
        info!("VM {} is stopped, starting it", vm.name());
        vm.start()
            .await
            .with_context(|| format!("Failed to start VM {}", vm.name()))?;
    }

    let auth = vm.descriptor().authentication.default_session_auth();
    let mut session = provider.session(vm.clone());
    debug!("Connecting to {} with {}", vm.name(), auth);
    if !session.connect(auth).await? {
        anyhow::bail!("Cannot connect to VM {} with {}", vm.name(), auth);
    }

    Ok(ScenarioContext { vm, session })
}
