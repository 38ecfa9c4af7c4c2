//! Data models for lifecycle testing
//!
//! VM descriptors, the scenario catalog and scenario results.

mod scenario;
mod scenario_result;
mod vm;

pub use scenario::{CreatePlan, Scenario, SetupPlan, Tier, SCENARIO_TAGS};
pub use scenario_result::{RunSummary, ScenarioResult, TestStatus};
pub use vm::{AuthMode, SessionAuth, VmDescriptor};
