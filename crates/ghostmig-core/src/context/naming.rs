//! Derived table and lock names.
//!
//! These templates are a compatibility contract: tooling that inspects a
//! running or aborted migration locates the ghost, old and changelog tables
//! by reproducing them.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ContextError;

/// Where the migration runs and what happens to the original table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    /// Migrate the table for real (master, possibly inspecting a replica).
    #[default]
    Direct,
    /// Dry run on a replica; the swapped-out table is kept for comparison.
    TestOnReplica,
    /// Migrate the table on a replica only.
    MigrateOnReplica,
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationMode::Direct => write!(f, "direct"),
            MigrationMode::TestOnReplica => write!(f, "test-on-replica"),
            MigrationMode::MigrateOnReplica => write!(f, "migrate-on-replica"),
        }
    }
}

impl FromStr for MigrationMode {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(MigrationMode::Direct),
            "test-on-replica" => Ok(MigrationMode::TestOnReplica),
            "migrate-on-replica" => Ok(MigrationMode::MigrateOnReplica),
            _ => Err(ContextError::parse(
                "migration mode",
                s,
                "expected direct, test-on-replica or migrate-on-replica",
            )),
        }
    }
}

/// Ghost table name: the explicit migrate target when given, else `_<table>_gho`.
pub fn ghost_table_name(original_table: &str, migrate_table: Option<&str>) -> String {
    match migrate_table {
        Some(target) => target.to_string(),
        None => format!("_{}_gho", original_table),
    }
}

/// Name the original table is renamed to at cut-over.
pub fn old_table_name(original_table: &str, mode: MigrationMode) -> String {
    match mode {
        MigrationMode::TestOnReplica => format!("_{}_ght", original_table),
        MigrationMode::MigrateOnReplica => format!("_{}_ghr", original_table),
        MigrationMode::Direct => format!("_{}_del", original_table),
    }
}

/// Changelog (heartbeat/state) table name.
pub fn changelog_table_name(original_table: &str) -> String {
    format!("_{}_ghc", original_table)
}

/// Voluntary lock serializing cut-over attempts on one table.
pub fn voluntary_lock_name(database: &str, original_table: &str) -> String {
    format!("{}.{}.lock", database, original_table)
}
