//! Lifecycle scenario catalog
//!
//! Every scenario is a variant carrying its identity (short name, tier,
//! tracking ID) and its setup plan.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::vm::AuthMode;

/// Tags shared by every lifecycle scenario
pub const SCENARIO_TAGS: &[&str] = &["wala", "lifecycle"];

/// Lifecycle scenarios, in default run order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    CreateVmSshkey,
    CreateVmPassword,
    CreateVmAll,
    StartVm,
    StopVm,
    RestartVm,
    RebootVmInsideGuest,
    DeleteVm,
}

/// Lookup table from short name to scenario
const SCENARIO_TABLE: &[(&str, Scenario)] = &[
    ("test_create_vm_sshkey", Scenario::CreateVmSshkey),
    ("test_create_vm_password", Scenario::CreateVmPassword),
    ("test_create_vm_all", Scenario::CreateVmAll),
    ("test_start_vm", Scenario::StartVm),
    ("test_stop_vm", Scenario::StopVm),
    ("test_restart_vm", Scenario::RestartVm),
    ("test_reboot_vm_inside_guest", Scenario::RebootVmInsideGuest),
    ("test_delete_vm", Scenario::DeleteVm),
];

impl Scenario {
    /// Short name used for selection and reporting
    pub fn short_name(&self) -> &'static str {
        SCENARIO_TABLE
            .iter()
            .find(|(_, s)| s == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Resolve a scenario from its short name.
    ///
    /// The `test_` prefix is optional, so `stop_vm` and `test_stop_vm`
    /// resolve to the same scenario.
    pub fn from_name(name: &str) -> Option<Scenario> {
        let name = name.trim().to_lowercase();
        let normalized = if name.starts_with("test_") {
            name
        } else {
            format!("test_{name}")
        };

        SCENARIO_TABLE
            .iter()
            .find(|(short, _)| *short == normalized)
            .map(|(_, scenario)| *scenario)
    }

    /// All scenarios in default run order
    pub fn all() -> Vec<Scenario> {
        SCENARIO_TABLE.iter().map(|(_, s)| *s).collect()
    }

    /// External tracking ID
    pub fn tracking_id(&self) -> &'static str {
        match self {
            Scenario::CreateVmSshkey => "RHEL7-41652",
            Scenario::CreateVmPassword => "RHEL-169439",
            Scenario::CreateVmAll => "RHEL-169634",
            Scenario::StartVm => "RHEL7-41653",
            Scenario::StopVm => "RHEL7-41654",
            Scenario::RestartVm => "RHEL7-41655",
            Scenario::RebootVmInsideGuest => "RHEL7-61482",
            Scenario::DeleteVm => "RHEL7-41656",
        }
    }

    /// Human readable title
    pub fn title(&self) -> &'static str {
        match self {
            Scenario::CreateVmSshkey => "Create a VM with sshkey",
            Scenario::CreateVmPassword => "Create a VM with password",
            Scenario::CreateVmAll => "Create a VM with both password and sshkey",
            Scenario::StartVm => "Start a VM",
            Scenario::StopVm => "Stop a VM",
            Scenario::RestartVm => "Restart a VM",
            Scenario::RebootVmInsideGuest => "Reboot a VM inside guest",
            Scenario::DeleteVm => "Delete a VM",
        }
    }

    /// Full description as reported by the test management system
    pub fn description(&self) -> String {
        format!(
            "{} WALA-TC: [life cycle] {}",
            self.tracking_id(),
            self.title()
        )
    }

    pub fn tier(&self) -> Tier {
        match self {
            Scenario::CreateVmAll | Scenario::RebootVmInsideGuest => Tier::Tier2,
            _ => Tier::Tier1,
        }
    }

    /// Setup this scenario needs before its body runs
    pub fn setup_plan(&self) -> SetupPlan {
        match self {
            Scenario::CreateVmSshkey => SetupPlan::Create(CreatePlan {
                name_suffix: None,
                authentication: AuthMode::Sshkey,
                generate_ssh_keys: None,
                clear_ssh_key: false,
                replace_existing: true,
                wait: true,
            }),
            Scenario::CreateVmPassword => SetupPlan::Create(CreatePlan {
                name_suffix: Some("-password"),
                authentication: AuthMode::Password,
                generate_ssh_keys: Some(false),
                clear_ssh_key: true,
                replace_existing: false,
                wait: true,
            }),
            Scenario::CreateVmAll => SetupPlan::Create(CreatePlan {
                name_suffix: Some("-all"),
                authentication: AuthMode::All,
                generate_ssh_keys: None,
                clear_ssh_key: false,
                replace_existing: false,
                wait: true,
            }),
            Scenario::StartVm => SetupPlan::EnsureConnectable {
                pre_delete: false,
                pre_stop: true,
            },
            _ => SetupPlan::EnsureConnectable {
                pre_delete: false,
                pre_stop: false,
            },
        }
    }

    /// Whether teardown must release the VM this scenario created
    pub fn deletes_on_teardown(&self) -> bool {
        matches!(self, Scenario::CreateVmPassword | Scenario::CreateVmAll)
    }

    /// Whether the body asserts the sudoers drop-in the guest agent writes
    pub fn checks_sudoers(&self) -> bool {
        matches!(
            self,
            Scenario::CreateVmSshkey | Scenario::CreateVmPassword | Scenario::CreateVmAll
        )
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.short_name(), self.tracking_id())
    }
}

/// Test tier classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier1,
    Tier2,
}

impl Tier {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tier1" | "1" => Some(Tier::Tier1),
            "tier2" | "2" => Some(Tier::Tier2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a fresh VM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatePlan {
    /// Appended to the configured VM name
    pub name_suffix: Option<&'static str>,

    pub authentication: AuthMode,

    /// Overrides the configured key generation flag
    pub generate_ssh_keys: Option<bool>,

    /// Drop configured public key material
    pub clear_ssh_key: bool,

    /// Delete an existing VM of the same name first
    pub replace_existing: bool,

    /// Block until the provider reports the VM created
    pub wait: bool,
}

/// How a scenario obtains its VM and session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetupPlan {
    /// Provision a fresh VM; the session is returned unconnected
    Create(CreatePlan),

    /// Reuse or repair the shared VM
    EnsureConnectable { pre_delete: bool, pre_stop: bool },
}
