//! In-process provider, VM and session doubles
//!
//! A [`FakeWorld`] holds every fake VM and a scripted guest. Handles and
//! sessions created from the same world observe each other, so a reboot
//! through the VM handle changes what the session reads back.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::reboot::BOOT_MARKER_COMMAND;
use super::swap::{RELEASE_VERSION_COMMAND, SWAP_SIZE_COMMAND};
use crate::models::{Scenario, SessionAuth, VmDescriptor};
use crate::provider::{Account, CloudProvider, PowerState, VmHandle, VmStatus};
use crate::session::RemoteSession;

struct VmRecord {
    descriptor: VmDescriptor,
    identity: u32,
    running: bool,
    boots: u32,
}

struct WorldState {
    vms: HashMap<String, VmRecord>,
    next_identity: u32,
    events: Vec<String>,
    commands: Vec<String>,
    account_logins: u32,
    session_logins: Vec<(String, SessionAuth)>,
    swap_sizes: VecDeque<String>,
    release: String,
    sudoers: Option<String>,
    whoami: Option<String>,
    reboot_takes_effect: bool,
    stop_takes_effect: bool,
    refuse_logins: bool,
    fail_create: bool,
    unsupported: Vec<Scenario>,
}

pub(crate) struct FakeWorld {
    state: Mutex<WorldState>,
}

impl FakeWorld {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WorldState {
                vms: HashMap::new(),
                next_identity: 1,
                events: Vec::new(),
                commands: Vec::new(),
                account_logins: 0,
                session_logins: Vec::new(),
                swap_sizes: VecDeque::from(vec!["2047".to_string()]),
                release: "7.9".to_string(),
                sudoers: None,
                whoami: None,
                reboot_takes_effect: true,
                stop_takes_effect: true,
                refuse_logins: false,
                fail_create: false,
                unsupported: Vec::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap()
    }

    /// Handle on an already running VM named `name`
    pub(crate) fn running_vm(self: &Arc<Self>, name: &str) -> Arc<dyn VmHandle> {
        let descriptor = VmDescriptor::new(name, "azureuser");
        self.insert(&descriptor);
        Arc::new(FakeVm {
            descriptor,
            world: self.clone(),
        })
    }

    pub(crate) fn session_for(self: &Arc<Self>, vm: &Arc<dyn VmHandle>) -> FakeSession {
        FakeSession::attach(self.clone(), vm.descriptor().clone())
    }

    fn insert(&self, descriptor: &VmDescriptor) {
        let mut state = self.state();
        let identity = state.next_identity;
        state.next_identity += 1;
        state.vms.insert(
            descriptor.name.clone(),
            VmRecord {
                descriptor: descriptor.clone(),
                identity,
                running: true,
                boots: 1,
            },
        );
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.state().vms.contains_key(name)
    }

    pub(crate) fn is_stopped(&self, name: &str) -> bool {
        self.state().vms.get(name).map_or(false, |vm| !vm.running)
    }

    pub(crate) fn identity_of(&self, name: &str) -> Option<u32> {
        self.state().vms.get(name).map(|vm| vm.identity)
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.state().commands.iter().filter(|c| *c == command).count()
    }

    pub(crate) fn logins(&self) -> u32 {
        self.state().account_logins
    }

    /// Credentials of successful session logins to `name`, in order
    pub(crate) fn logins_by(&self, name: &str) -> Vec<SessionAuth> {
        self.state()
            .session_logins
            .iter()
            .filter(|(vm, _)| vm == name)
            .map(|(_, auth)| *auth)
            .collect()
    }

    /// Swap sizes reported in order; the last one repeats
    pub(crate) fn set_swap_sizes(&self, sizes: &[&str]) {
        self.state().swap_sizes = sizes.iter().map(|s| s.to_string()).collect();
    }

    pub(crate) fn set_release(&self, release: &str) {
        self.state().release = release.to_string();
    }

    pub(crate) fn set_unsupported(&self, scenarios: &[Scenario]) {
        self.state().unsupported = scenarios.to_vec();
    }

    pub(crate) fn set_sudoers(&self, content: &str) {
        self.state().sudoers = Some(content.to_string());
    }

    pub(crate) fn set_whoami(&self, user: &str) {
        self.state().whoami = Some(user.to_string());
    }

    pub(crate) fn set_reboot_takes_effect(&self, enabled: bool) {
        self.state().reboot_takes_effect = enabled;
    }

    pub(crate) fn set_stop_takes_effect(&self, enabled: bool) {
        self.state().stop_takes_effect = enabled;
    }

    pub(crate) fn set_refuse_logins(&self, refuse: bool) {
        self.state().refuse_logins = refuse;
    }

    pub(crate) fn set_fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    fn reboot(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let takes_effect = state.reboot_takes_effect;
        let vm = state
            .vms
            .get_mut(name)
            .ok_or_else(|| anyhow::anyhow!("VM {name} not found"))?;
        if takes_effect {
            vm.boots += 1;
        }
        Ok(())
    }

    fn guest_output(&self, name: &str, command: &str) -> Result<String> {
        let mut state = self.state();
        state.commands.push(command.to_string());

        let vm = state
            .vms
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("VM {name} not found"))?;
        let boots = vm.boots;
        let username = vm.descriptor.username.clone();
        let sudoers = if vm.descriptor.authentication.allows_password() {
            vm.descriptor.password_sudoers_line()
        } else {
            vm.descriptor.nopasswd_sudoers_line()
        };

        let output = match command {
            BOOT_MARKER_COMMAND => {
                format!("reboot   system boot  boot-{boots}\n\nwtmp begins")
            }
            RELEASE_VERSION_COMMAND => state.release.clone(),
            SWAP_SIZE_COMMAND => {
                if state.swap_sizes.len() > 1 {
                    state.swap_sizes.pop_front().unwrap_or_default()
                } else {
                    state.swap_sizes.front().cloned().unwrap_or_default()
                }
            }
            "whoami" => state.whoami.clone().unwrap_or(username),
            c if c.ends_with("/etc/sudoers.d/waagent") => {
                state.sudoers.clone().unwrap_or(sudoers)
            }
            _ => String::new(),
        };

        Ok(output.trim_end().to_string())
    }
}

/// Cloud provider over a [`FakeWorld`]
#[derive(Clone)]
pub(crate) struct FakeCloud {
    world: Arc<FakeWorld>,
    account: Arc<FakeAccount>,
}

impl FakeCloud {
    pub(crate) fn new() -> Self {
        let world = FakeWorld::new();
        Self {
            account: Arc::new(FakeAccount {
                world: world.clone(),
            }),
            world,
        }
    }

    pub(crate) fn world(&self) -> &Arc<FakeWorld> {
        &self.world
    }
}

impl CloudProvider for FakeCloud {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn account(&self) -> &dyn Account {
        self.account.as_ref()
    }

    fn vm(&self, descriptor: VmDescriptor) -> Arc<dyn VmHandle> {
        Arc::new(FakeVm {
            descriptor,
            world: self.world.clone(),
        })
    }

    fn session(&self, vm: Arc<dyn VmHandle>) -> Box<dyn RemoteSession> {
        Box::new(FakeSession::attach(
            self.world.clone(),
            vm.descriptor().clone(),
        ))
    }

    fn unsupported_reason(&self, scenario: Scenario) -> Option<&'static str> {
        self.world
            .state()
            .unsupported
            .contains(&scenario)
            .then_some("Not supported by the fake backend")
    }
}

pub(crate) struct FakeAccount {
    world: Arc<FakeWorld>,
}

#[async_trait]
impl Account for FakeAccount {
    async fn login(&self) -> Result<()> {
        self.world.state().account_logins += 1;
        Ok(())
    }
}

pub(crate) struct FakeVm {
    descriptor: VmDescriptor,
    world: Arc<FakeWorld>,
}

impl FakeVm {
    fn record_event(&self, event: String) {
        self.world.state().events.push(event);
    }
}

#[async_trait]
impl VmHandle for FakeVm {
    fn descriptor(&self) -> &VmDescriptor {
        &self.descriptor
    }

    async fn create(&self, wait: bool) -> Result<()> {
        self.record_event(format!("create {} wait={}", self.descriptor.name, wait));
        if self.world.state().fail_create {
            anyhow::bail!("fake create failure");
        }
        if !self.world.exists(&self.descriptor.name) {
            self.world.insert(&self.descriptor);
        }
        Ok(())
    }

    async fn delete(&self, wait: bool) -> Result<()> {
        self.record_event(format!("delete {} wait={}", self.descriptor.name, wait));
        match self.world.state().vms.remove(&self.descriptor.name) {
            Some(_) => Ok(()),
            None => anyhow::bail!("VM {} not found", self.descriptor.name),
        }
    }

    async fn start(&self) -> Result<()> {
        self.record_event(format!("start {}", self.descriptor.name));
        let mut state = self.world.state();
        let vm = state
            .vms
            .get_mut(&self.descriptor.name)
            .ok_or_else(|| anyhow::anyhow!("VM {} not found", self.descriptor.name))?;
        if !vm.running {
            vm.running = true;
            vm.boots += 1;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record_event(format!("stop {}", self.descriptor.name));
        let mut state = self.world.state();
        let takes_effect = state.stop_takes_effect;
        let vm = state
            .vms
            .get_mut(&self.descriptor.name)
            .ok_or_else(|| anyhow::anyhow!("VM {} not found", self.descriptor.name))?;
        if takes_effect {
            vm.running = false;
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<()> {
        self.record_event(format!("reboot {}", self.descriptor.name));
        self.world.reboot(&self.descriptor.name)
    }

    async fn show(&self) -> Result<VmStatus> {
        let state = self.world.state();
        let vm = state
            .vms
            .get(&self.descriptor.name)
            .ok_or_else(|| anyhow::anyhow!("VM {} not found", self.descriptor.name))?;
        Ok(VmStatus {
            name: self.descriptor.name.clone(),
            power_state: if vm.running {
                PowerState::Running
            } else {
                PowerState::Deallocated
            },
            address: Some(format!("10.0.0.{}", vm.identity)),
        })
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.world.exists(&self.descriptor.name))
    }

    async fn is_stopped(&self) -> Result<bool> {
        Ok(self.show().await?.power_state.is_stopped())
    }

    async fn public_address(&self) -> Result<String> {
        self.show()
            .await?
            .address
            .ok_or_else(|| anyhow::anyhow!("VM {} has no address", self.descriptor.name))
    }
}

/// Session against a VM in a [`FakeWorld`]
pub(crate) struct FakeSession {
    world: Arc<FakeWorld>,
    descriptor: VmDescriptor,
    connected: Mutex<Option<SessionAuth>>,
}

impl FakeSession {
    /// Standalone session on a running VM with the default guest script
    pub(crate) fn new(username: &str) -> Self {
        let world = FakeWorld::new();
        let descriptor = VmDescriptor::new("fake-vm", username);
        world.insert(&descriptor);
        Self::attach(world, descriptor)
    }

    fn attach(world: Arc<FakeWorld>, descriptor: VmDescriptor) -> Self {
        Self {
            world,
            descriptor,
            connected: Mutex::new(None),
        }
    }

    pub(crate) fn swap_sizes(self, sizes: &[&str]) -> Self {
        self.world.set_swap_sizes(sizes);
        self
    }

    pub(crate) fn release(self, release: &str) -> Self {
        self.world.set_release(release);
        self
    }

    /// Mark the session connected without a login
    pub(crate) fn force_connected(&self, auth: SessionAuth) {
        *self.connected.lock().unwrap() = Some(auth);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.world.commands()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.world.count(command)
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn connect(&mut self, auth: SessionAuth) -> Result<bool> {
        let mut state = self.world.state();
        if state.refuse_logins {
            return Ok(false);
        }

        let accepted = match state.vms.get(&self.descriptor.name) {
            Some(vm) if vm.running => match auth {
                SessionAuth::PublicKey => vm.descriptor.authentication.allows_public_key(),
                SessionAuth::Password => {
                    vm.descriptor.authentication.allows_password()
                        && vm.descriptor.password.is_some()
                        && vm.descriptor.password == self.descriptor.password
                }
            },
            _ => false,
        };

        if accepted {
            state
                .session_logins
                .push((self.descriptor.name.clone(), auth));
            *self.connected.lock().unwrap() = Some(auth);
        }
        Ok(accepted)
    }

    async fn cmd_output(&self, command: &str) -> Result<String> {
        if self.connected_as().is_none() {
            anyhow::bail!("Session to {} is not connected", self.descriptor.name);
        }
        self.world.guest_output(&self.descriptor.name, command)
    }

    async fn send_line(&self, command: &str) -> Result<()> {
        if self.connected_as().is_none() {
            anyhow::bail!("Session to {} is not connected", self.descriptor.name);
        }
        self.world.state().commands.push(command.to_string());
        if command == super::reboot::GUEST_REBOOT_COMMAND {
            self.world.reboot(&self.descriptor.name)?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        *self.connected.lock().unwrap() = None;
    }

    fn connected_as(&self) -> Option<SessionAuth> {
        *self.connected.lock().unwrap()
    }
}
