//! Lifecycle test harness
//!
//! Setup, scenario bodies, the swap and reboot checks, teardown and the
//! runner tying them together.

mod error;
mod reboot;
mod retry;
mod runner;
mod scenarios;
mod setup;
mod swap;
mod teardown;

#[cfg(test)]
pub(crate) mod fakes;

pub use retry::RetryBudget;
pub use runner::{select_scenarios, ScenarioRunner};
pub use swap::ReleaseVersion;
