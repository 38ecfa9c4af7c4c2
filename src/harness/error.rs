//! Scenario failure types
//!
//! A [`ScenarioError`] means the system under test misbehaved and the
//! scenario reports FAIL. Anything else that aborts a scenario is a
//! collaborator error and reports ERROR.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    /// Expected and actual values differ
    #[error("{message}.\nExpect: {expected}\nReal: {actual}")]
    Assertion {
        message: String,
        expected: String,
        actual: String,
    },

    /// A session could not log in
    #[error("{0}")]
    LoginFailed(String),

    /// Swap size never came back within the retry budget
    #[error("Swap is not on after VM restart (expected {expected} MB, last observed {last:?} after {attempts} attempts)")]
    SwapNotRestored {
        expected: String,
        last: Option<String>,
        attempts: u32,
    },

    /// Boot marker unchanged across a reboot
    #[error("{0}")]
    NotRebooted(String),
}

/// Fail unless `actual` equals `expected`
pub fn ensure_eq(message: &str, expected: &str, actual: &str) -> Result<(), ScenarioError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ScenarioError::Assertion {
            message: message.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Fail unless `actual` contains `expected`
pub fn ensure_contains(message: &str, expected: &str, actual: &str) -> Result<(), ScenarioError> {
    if actual.contains(expected) {
        Ok(())
    } else {
        Err(ScenarioError::Assertion {
            message: message.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
