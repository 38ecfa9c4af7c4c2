//! Output formatting module
//!
//! Renders scenario results and run summaries.

mod formatter;

pub use formatter::{save_summary, OutputFormat, ResultFormatter};
