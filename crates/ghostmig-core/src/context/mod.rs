//! Shared migration state.
//!
//! One [`MigrationContext`] exists per migration. It is built with defaults,
//! populated from the config file and command line, then wrapped in an
//! `Arc` and handed to every worker: the row copier, the change-stream
//! consumer, the throttler, the status reporter and the cut-over sequencer.
//!
//! State that changes while workers run is split into independent domains so
//! that the hot throttle check never contends with the watchdog or with
//! progress counters:
//!
//! | Domain | Guard | Contents |
//! |--------|-------|----------|
//! | throttle | `Mutex` | throttled flag and reason, load maps, queries, nice ratio, replicas, retries |
//! | credentials | `Mutex` | parsed config file, CLI credentials, connection descriptors |
//! | timing | `Mutex` | row-copy, lock and rename marks |
//! | point of interest | `Mutex` | watchdog timestamp |
//! | range, table shape, table facts | `RwLock` | chunk boundaries, column layouts, inspected facts |
//! | counters | atomics | iteration, rows copied, DML events, lag, boolean signals |
//!
//! Values are only consistent within a domain.

mod credentials;
pub mod naming;
mod progress;
mod throttle;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cutover::CutOver;
use crate::error::{ContextError, Result};
use crate::schema::TableShape;

pub use credentials::{ClientSection, ConfigFile, OscSection};
pub use naming::MigrationMode;

use credentials::CredentialState;
use progress::{MigrationRange, ProgressCounters, TimingMarks};
use throttle::ThrottleState;

/// Default number of rows per copy chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;
/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: u64 = 100;
/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: u64 = 100_000;
/// Default replication lag (ms) above which work is throttled.
pub const DEFAULT_MAX_LAG_MILLIS: u64 = 1500;
/// Smallest accepted lag threshold (ms).
pub const MIN_MAX_LAG_MILLIS: u64 = 1000;
/// Default cut-over lock timeout in seconds.
pub const DEFAULT_CUT_OVER_LOCK_TIMEOUT_SECS: u64 = 3;
/// Smallest accepted cut-over lock timeout in seconds.
pub const MIN_CUT_OVER_LOCK_TIMEOUT_SECS: i64 = 1;
/// Largest accepted cut-over lock timeout in seconds.
pub const MAX_CUT_OVER_LOCK_TIMEOUT_SECS: i64 = 10;
/// Default retry budget for transient failures.
pub const DEFAULT_NUM_RETRIES: u64 = 60;
/// Largest accepted nice ratio.
pub const MAX_NICE_RATIO: f64 = 100.0;

/// How the rows estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RowsEstimateMethod {
    /// `SHOW TABLE STATUS`.
    #[default]
    TableStatus,
    /// `EXPLAIN SELECT COUNT(*)`.
    Explain,
    /// Exact `SELECT COUNT(*)`.
    Count,
}

/// Facts about the original table and server gathered by inspection.
#[derive(Debug, Clone, Default)]
pub struct TableFacts {
    /// Storage engine, e.g. `InnoDB`.
    pub table_engine: String,
    /// Estimated number of rows in the original table.
    pub rows_estimate: u64,
    /// How `rows_estimate` was obtained.
    pub rows_estimate_method: RowsEstimateMethod,
    /// `binlog_format` found on the inspected server.
    pub original_binlog_format: String,
    /// `binlog_row_image` found on the inspected server.
    pub original_binlog_row_image: String,
}

type StopStreamingFn = dyn Fn() -> bool + Send + Sync;

/// Global state of one migration, shared by every worker.
pub struct MigrationContext {
    /// Schema holding the table.
    pub database_name: String,
    /// Table being altered.
    pub original_table_name: String,
    /// Write into an explicit target instead of the generated `_<table>_gho`.
    pub migrate: bool,
    /// Target schema when `migrate` is set. Defaults to `database_name`.
    pub migrate_database_name: Option<String>,
    /// Target table when `migrate` is set. Defaults to the original table name.
    pub migrate_table_name: Option<String>,
    /// The `ALTER TABLE` body applied to the ghost table.
    pub alter_statement: String,
    /// Where the migration runs.
    pub mode: MigrationMode,

    /// Count rows exactly instead of trusting the estimate.
    pub count_table_rows: bool,
    /// Permit inspecting the master directly.
    pub allowed_running_on_master: bool,
    /// Permit active-active master topologies.
    pub allowed_master_master: bool,
    /// Permit switching the server's binlog format to ROW.
    pub switch_to_row_binlog_format: bool,
    /// Permit iterating on a unique key with nullable columns.
    pub nullable_unique_key_allowed: bool,
    /// Operator approved the detected column renames.
    pub approve_renamed_columns: bool,
    /// Operator asked to not copy renamed columns.
    pub skip_renamed_columns: bool,
    /// Build and backfill but never cut over.
    pub noop: bool,
    /// Drop the old table after a successful cut-over.
    pub ok_to_drop_table: bool,
    /// Drop a leftover old table before starting.
    pub initially_drop_old_table: bool,
    /// Drop a leftover ghost table before starting.
    pub initially_drop_ghost_table: bool,

    /// Throttle while this file exists.
    pub throttle_flag_file: Option<PathBuf>,
    /// Second throttle file, typically shared by concurrent migrations.
    pub throttle_additional_flag_file: Option<PathBuf>,
    /// Hold before cut-over while this file exists.
    pub postpone_cut_over_flag_file: Option<PathBuf>,
    /// Abort the migration as soon as this file appears.
    pub panic_flag_file: Option<PathBuf>,
    /// Cut-over strategy.
    pub cut_over_type: CutOver,

    /// Unix socket for interactive commands.
    pub serve_socket_file: Option<PathBuf>,
    /// Remove a stale socket file before listening.
    pub drop_serve_socket: bool,
    /// TCP port for interactive commands.
    pub serve_tcp_port: Option<u16>,

    /// Config file with client credentials and defaults.
    pub config_file: Option<PathBuf>,

    start_time: Instant,
    chunk_size: AtomicU64,
    max_lag_millis: AtomicU64,
    cut_over_lock_timeout_secs: AtomicU64,
    progress: ProgressCounters,

    throttle: Mutex<ThrottleState>,
    credentials: Mutex<CredentialState>,
    timing: Mutex<TimingMarks>,
    point_of_interest: Mutex<Instant>,
    range: RwLock<MigrationRange>,
    table_shape: RwLock<TableShape>,
    table_facts: RwLock<TableFacts>,

    can_stop_streaming: Option<Box<StopStreamingFn>>,
}

impl MigrationContext {
    /// Create a context with default settings for `database.table`.
    pub fn new(database_name: impl Into<String>, original_table_name: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            database_name: database_name.into(),
            original_table_name: original_table_name.into(),
            migrate: false,
            migrate_database_name: None,
            migrate_table_name: None,
            alter_statement: String::new(),
            mode: MigrationMode::Direct,
            count_table_rows: false,
            allowed_running_on_master: false,
            allowed_master_master: false,
            switch_to_row_binlog_format: false,
            nullable_unique_key_allowed: false,
            approve_renamed_columns: false,
            skip_renamed_columns: false,
            noop: false,
            ok_to_drop_table: false,
            initially_drop_old_table: false,
            initially_drop_ghost_table: false,
            throttle_flag_file: None,
            throttle_additional_flag_file: None,
            postpone_cut_over_flag_file: None,
            panic_flag_file: None,
            cut_over_type: CutOver::default(),
            serve_socket_file: None,
            drop_serve_socket: false,
            serve_tcp_port: None,
            config_file: None,
            start_time: now,
            chunk_size: AtomicU64::new(DEFAULT_CHUNK_SIZE),
            max_lag_millis: AtomicU64::new(DEFAULT_MAX_LAG_MILLIS),
            cut_over_lock_timeout_secs: AtomicU64::new(DEFAULT_CUT_OVER_LOCK_TIMEOUT_SECS),
            progress: ProgressCounters::default(),
            throttle: Mutex::new(ThrottleState::default()),
            credentials: Mutex::new(CredentialState::default()),
            timing: Mutex::new(TimingMarks::default()),
            point_of_interest: Mutex::new(now),
            range: RwLock::new(MigrationRange::default()),
            table_shape: RwLock::new(TableShape::default()),
            table_facts: RwLock::new(TableFacts::default()),
            can_stop_streaming: None,
        }
    }

    // Derived names

    /// Name of the ghost table.
    pub fn ghost_table_name(&self) -> String {
        let target = self.migrate.then(|| {
            self.migrate_table_name
                .as_deref()
                .unwrap_or(self.original_table_name.as_str())
        });
        naming::ghost_table_name(&self.original_table_name, target)
    }

    /// Schema holding the ghost table.
    pub fn ghost_database_name(&self) -> &str {
        match (self.migrate, self.migrate_database_name.as_deref()) {
            (true, Some(database)) => database,
            _ => self.database_name.as_str(),
        }
    }

    /// Name the original table gets at cut-over.
    pub fn old_table_name(&self) -> String {
        naming::old_table_name(&self.original_table_name, self.mode)
    }

    /// Name of the changelog table.
    pub fn changelog_table_name(&self) -> String {
        naming::changelog_table_name(&self.original_table_name)
    }

    /// Name of the voluntary lock held throughout the table swap.
    pub fn voluntary_lock_name(&self) -> String {
        naming::voluntary_lock_name(&self.database_name, &self.original_table_name)
    }

    // Table facts

    /// Inspected facts about the table and server.
    pub fn table_facts(&self) -> RwLockReadGuard<'_, TableFacts> {
        self.table_facts.read()
    }

    /// Mutable access to the inspected facts.
    pub fn table_facts_mut(&self) -> RwLockWriteGuard<'_, TableFacts> {
        self.table_facts.write()
    }

    /// Whether the original binlog format is anything but ROW.
    pub fn requires_binlog_format_change(&self) -> bool {
        self.table_facts.read().original_binlog_format != "ROW"
    }

    /// Whether the table engine supports transactions.
    pub fn is_transactional_table(&self) -> bool {
        matches!(
            self.table_facts.read().table_engine.to_ascii_lowercase().as_str(),
            "innodb" | "tokudb"
        )
    }

    // Table shape

    /// Column layouts and the chosen iteration key.
    pub fn table_shape(&self) -> RwLockReadGuard<'_, TableShape> {
        self.table_shape.read()
    }

    /// Mutable access to the column layouts.
    pub fn table_shape_mut(&self) -> RwLockWriteGuard<'_, TableShape> {
        self.table_shape.write()
    }

    // Tunables and bounds

    /// Rows per copy chunk.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.load(Ordering::Relaxed)
    }

    /// Set rows per chunk, clamped into [100, 100000].
    pub fn set_chunk_size(&self, chunk_size: i64) {
        let clamped = chunk_size.clamp(MIN_CHUNK_SIZE as i64, MAX_CHUNK_SIZE as i64) as u64;
        if clamped as i64 != chunk_size {
            debug!(requested = chunk_size, chunk_size = clamped, "chunk size clamped");
        }
        self.chunk_size.store(clamped, Ordering::Relaxed);
    }

    /// Replication lag (ms) above which work is throttled.
    pub fn max_lag_milliseconds_throttle_threshold(&self) -> u64 {
        self.max_lag_millis.load(Ordering::Relaxed)
    }

    /// Set the lag threshold, raised to at least 1000ms.
    pub fn set_max_lag_milliseconds_throttle_threshold(&self, millis: i64) {
        let clamped = millis.max(MIN_MAX_LAG_MILLIS as i64) as u64;
        if clamped as i64 != millis {
            debug!(requested = millis, max_lag_millis = clamped, "lag threshold clamped");
        }
        self.max_lag_millis.store(clamped, Ordering::Relaxed);
    }

    /// Seconds the cut-over may hold table locks.
    pub fn cut_over_lock_timeout_seconds(&self) -> u64 {
        self.cut_over_lock_timeout_secs.load(Ordering::Relaxed)
    }

    /// Set the cut-over lock timeout. Values outside [1, 10] are rejected.
    pub fn set_cut_over_lock_timeout_seconds(&self, timeout_secs: i64) -> Result<()> {
        let current = self.cut_over_lock_timeout_seconds();
        if timeout_secs < MIN_CUT_OVER_LOCK_TIMEOUT_SECS {
            warn!(requested = timeout_secs, current, "cut-over lock timeout rejected");
            return Err(ContextError::validation(
                "cut-over lock timeout",
                format!("minimal timeout is 1sec, timeout remains at {}", current),
            ));
        }
        if timeout_secs > MAX_CUT_OVER_LOCK_TIMEOUT_SECS {
            warn!(requested = timeout_secs, current, "cut-over lock timeout rejected");
            return Err(ContextError::validation(
                "cut-over lock timeout",
                format!("maximal timeout is 10sec, timeout remains at {}", current),
            ));
        }
        self.cut_over_lock_timeout_secs
            .store(timeout_secs as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Cut-over lock timeout as a duration.
    pub fn cut_over_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.cut_over_lock_timeout_seconds())
    }

    // Lifetime

    /// Time since the context was created.
    pub fn elapsed_time(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Install the predicate the change-stream consumer polls to decide
    /// whether it may stop tailing.
    pub fn set_can_stop_streaming<F>(&mut self, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.can_stop_streaming = Some(Box::new(predicate));
    }

    /// Whether streaming may stop. False when no predicate is installed.
    pub fn can_stop_streaming(&self) -> bool {
        self.can_stop_streaming
            .as_ref()
            .is_some_and(|predicate| predicate())
    }
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationContext")
            .field("database_name", &self.database_name)
            .field("original_table_name", &self.original_table_name)
            .field("migrate", &self.migrate)
            .field("migrate_database_name", &self.migrate_database_name)
            .field("migrate_table_name", &self.migrate_table_name)
            .field("mode", &self.mode)
            .field("cut_over_type", &self.cut_over_type)
            .field("noop", &self.noop)
            .field("chunk_size", &self.chunk_size())
            .finish_non_exhaustive()
    }
}
