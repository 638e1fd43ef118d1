//! Point-in-time progress report.
//!
//! The status reporter and the CLI render a [`MigrationStatus`] as JSON. Each
//! field is read from its own domain, so the snapshot as a whole is not
//! atomic; the throttled flag and its reason are.

use serde::Serialize;

use crate::context::{MigrationContext, MigrationMode, RowsEstimateMethod};
use crate::cutover::CutOver;

/// Throttle part of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleStatus {
    /// Whether work is paused.
    pub throttled: bool,
    /// Why work is paused. Omitted when running.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Whether an operator asked to throttle.
    pub commanded_by_user: bool,
    /// Lag threshold in milliseconds.
    pub max_lag_millis: u64,
    /// Last measured replication lag in milliseconds.
    pub current_lag_millis: u64,
    /// Voluntary sleep per unit of work time.
    pub nice_ratio: f64,
    /// Max-load thresholds as `Name=Value,...`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub max_load: String,
    /// Critical-load thresholds as `Name=Value,...`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub critical_load: String,
    /// Replicas whose lag is polled, as `host:port`.
    pub control_replicas: Vec<String>,
}

/// Snapshot of one migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    /// Schema holding the original table.
    pub database: String,
    /// Table being altered.
    pub table: String,
    /// Schema holding the ghost table.
    pub ghost_database: String,
    /// Ghost table name.
    pub ghost_table: String,
    /// Name the original table gets at cut-over.
    pub old_table: String,
    /// Changelog table name.
    pub changelog_table: String,
    /// Where the migration runs.
    pub mode: MigrationMode,
    /// Cut-over strategy.
    pub cut_over: CutOver,
    /// Whether this is a dry run.
    pub noop: bool,

    /// Rows per copy chunk.
    pub chunk_size: u64,
    /// Seconds the cut-over may hold table locks.
    pub cut_over_lock_timeout_seconds: u64,
    /// Retry budget for transient failures.
    pub max_retries: u64,

    /// Estimated rows in the original table.
    pub rows_estimate: u64,
    /// How the estimate was obtained.
    pub rows_estimate_method: RowsEstimateMethod,
    /// Rows written to the ghost table so far.
    pub rows_copied: u64,
    /// Rows copied relative to the estimate, in percent.
    pub complete_percent: f64,
    /// Chunks copied so far.
    pub iteration: u64,
    /// Change-stream events applied so far.
    pub dml_events_applied: u64,
    /// Whether both copy boundaries are known.
    pub has_migration_range: bool,

    /// Seconds since the context was created.
    pub elapsed_seconds: f64,
    /// Seconds spent copying rows.
    pub row_copy_seconds: f64,
    /// Whether cut-over is being held by the postpone flag file.
    pub postponing_cut_over: bool,
    /// Throttle state and settings.
    pub throttle: ThrottleStatus,
}

impl MigrationStatus {
    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl MigrationContext {
    /// Take a progress snapshot.
    pub fn status(&self) -> MigrationStatus {
        let (throttled, reason) = self.is_throttled();
        let (rows_estimate, rows_estimate_method) = {
            let facts = self.table_facts();
            (facts.rows_estimate, facts.rows_estimate_method)
        };
        let current_lag_millis = u64::try_from(self.current_lag().as_millis()).unwrap_or(u64::MAX);

        MigrationStatus {
            database: self.database_name.clone(),
            table: self.original_table_name.clone(),
            ghost_database: self.ghost_database_name().to_string(),
            ghost_table: self.ghost_table_name(),
            old_table: self.old_table_name(),
            changelog_table: self.changelog_table_name(),
            mode: self.mode,
            cut_over: self.cut_over_type,
            noop: self.noop,
            chunk_size: self.chunk_size(),
            cut_over_lock_timeout_seconds: self.cut_over_lock_timeout_seconds(),
            max_retries: self.max_retries(),
            rows_estimate,
            rows_estimate_method,
            rows_copied: self.total_rows_copied(),
            complete_percent: self.row_copy_complete_percent(),
            iteration: self.iteration(),
            dml_events_applied: self.total_dml_events_applied(),
            has_migration_range: self.has_migration_range(),
            elapsed_seconds: self.elapsed_time().as_secs_f64(),
            row_copy_seconds: self.elapsed_row_copy_time().as_secs_f64(),
            postponing_cut_over: self.is_postponing_cut_over(),
            throttle: ThrottleStatus {
                throttled,
                reason,
                commanded_by_user: self.throttle_commanded_by_user(),
                max_lag_millis: self.max_lag_milliseconds_throttle_threshold(),
                current_lag_millis,
                nice_ratio: self.nice_ratio(),
                max_load: self.max_load().to_string(),
                critical_load: self.critical_load().to_string(),
                control_replicas: self
                    .throttle_control_replica_keys()
                    .instance_keys()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            },
        }
    }
}
