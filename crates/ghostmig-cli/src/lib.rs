//! Ghostmig CLI library.
//!
//! Turns command-line flags and the config file into a
//! [`ghostmig_core::MigrationContext`] and reports on it.

pub mod config;
pub mod error;
pub mod report;

pub use config::Args;
pub use error::{CliError, Result};
pub use report::MigrationReport;
