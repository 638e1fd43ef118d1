//! Copy progress: counters, key ranges, timing marks and the watchdog mark.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::MigrationContext;
use crate::schema::ColumnValues;

/// Lock-free progress signals.
#[derive(Debug, Default)]
pub(super) struct ProgressCounters {
    iteration: AtomicU64,
    total_rows_copied: AtomicU64,
    total_dml_events_applied: AtomicU64,
    current_lag_millis: AtomicU64,
    throttle_commanded_by_user: AtomicBool,
    is_postponing_cut_over: AtomicBool,
    counting_rows: AtomicBool,
}

/// Key boundaries of the whole copy and of the chunk in flight.
#[derive(Debug, Default)]
pub(super) struct MigrationRange {
    min_values: Option<ColumnValues>,
    max_values: Option<ColumnValues>,
    iteration_min_values: Option<ColumnValues>,
    iteration_max_values: Option<ColumnValues>,
}

#[derive(Debug, Default)]
pub(super) struct TimingMarks {
    row_copy_start: Option<Instant>,
    row_copy_end: Option<Instant>,
    lock_tables_start: Option<Instant>,
    rename_tables_start: Option<Instant>,
    rename_tables_end: Option<Instant>,
}

fn elapsed_between(start: Option<Instant>, end: Option<Instant>) -> Duration {
    match (start, end) {
        (None, _) => Duration::ZERO,
        (Some(start), None) => start.elapsed(),
        (Some(start), Some(end)) => end.saturating_duration_since(start),
    }
}

impl MigrationContext {
    // Counters

    /// Number of chunks copied so far.
    pub fn iteration(&self) -> u64 {
        self.progress.iteration.load(Ordering::Relaxed)
    }

    /// Count one completed chunk. Returns the new iteration number.
    pub fn increment_iteration(&self) -> u64 {
        self.progress.iteration.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Rows actually written to the ghost table by the copier.
    pub fn total_rows_copied(&self) -> u64 {
        self.progress.total_rows_copied.load(Ordering::Relaxed)
    }

    /// Add the rows affected by one chunk.
    pub fn add_rows_copied(&self, rows: u64) {
        self.progress.total_rows_copied.fetch_add(rows, Ordering::Relaxed);
    }

    /// Change-stream events applied to the ghost table.
    pub fn total_dml_events_applied(&self) -> u64 {
        self.progress.total_dml_events_applied.load(Ordering::Relaxed)
    }

    /// Add applied change-stream events.
    pub fn add_dml_events_applied(&self, events: u64) {
        self.progress
            .total_dml_events_applied
            .fetch_add(events, Ordering::Relaxed);
    }

    /// Last measured replication lag.
    pub fn current_lag(&self) -> Duration {
        Duration::from_millis(self.progress.current_lag_millis.load(Ordering::Relaxed))
    }

    /// Record the latest replication lag measurement.
    pub fn set_current_lag(&self, lag: Duration) {
        let millis = u64::try_from(lag.as_millis()).unwrap_or(u64::MAX);
        self.progress.current_lag_millis.store(millis, Ordering::Relaxed);
    }

    /// Whether an operator asked to throttle.
    pub fn throttle_commanded_by_user(&self) -> bool {
        self.progress.throttle_commanded_by_user.load(Ordering::SeqCst)
    }

    /// Set or clear the operator throttle command.
    pub fn set_throttle_commanded_by_user(&self, throttle: bool) {
        self.progress
            .throttle_commanded_by_user
            .store(throttle, Ordering::SeqCst);
    }

    /// Whether cut-over is currently being held by the postpone flag file.
    pub fn is_postponing_cut_over(&self) -> bool {
        self.progress.is_postponing_cut_over.load(Ordering::SeqCst)
    }

    /// Record whether cut-over is being held.
    pub fn set_postponing_cut_over(&self, postponing: bool) {
        self.progress
            .is_postponing_cut_over
            .store(postponing, Ordering::SeqCst);
    }

    /// Whether an exact row count is running.
    pub fn is_counting_rows(&self) -> bool {
        self.progress.counting_rows.load(Ordering::SeqCst)
    }

    /// Record whether an exact row count is running.
    pub fn set_counting_rows(&self, counting: bool) {
        self.progress.counting_rows.store(counting, Ordering::SeqCst);
    }

    /// Rows copied relative to the rows estimate, in percent.
    pub fn row_copy_complete_percent(&self) -> f64 {
        let estimate = self.table_facts.read().rows_estimate;
        if estimate == 0 {
            return 100.0;
        }
        (self.total_rows_copied() as f64 / estimate as f64) * 100.0
    }

    // Ranges

    /// Whether both boundaries of the whole copy are known.
    ///
    /// False when the original table is empty, in which case there is nothing to copy.
    pub fn has_migration_range(&self) -> bool {
        let range = self.range.read();
        range.min_values.is_some() && range.max_values.is_some()
    }

    /// Lower boundary of the whole copy.
    pub fn migration_range_min_values(&self) -> Option<ColumnValues> {
        self.range.read().min_values.clone()
    }

    /// Upper boundary of the whole copy.
    pub fn migration_range_max_values(&self) -> Option<ColumnValues> {
        self.range.read().max_values.clone()
    }

    /// Set the lower boundary of the whole copy.
    pub fn set_migration_range_min_values(&self, values: Option<ColumnValues>) {
        self.range.write().min_values = values;
    }

    /// Set the upper boundary of the whole copy.
    pub fn set_migration_range_max_values(&self, values: Option<ColumnValues>) {
        self.range.write().max_values = values;
    }

    /// Boundaries of the chunk in flight.
    pub fn migration_iteration_range(&self) -> (Option<ColumnValues>, Option<ColumnValues>) {
        let range = self.range.read();
        (
            range.iteration_min_values.clone(),
            range.iteration_max_values.clone(),
        )
    }

    /// Set both boundaries of the chunk in flight.
    pub fn set_migration_iteration_range(&self, min: ColumnValues, max: ColumnValues) {
        let mut range = self.range.write();
        range.iteration_min_values = Some(min);
        range.iteration_max_values = Some(max);
    }

    // Timing marks

    /// Record that row copy started.
    pub fn mark_row_copy_start_time(&self) {
        self.timing.lock().row_copy_start = Some(Instant::now());
    }

    /// Record that row copy finished.
    pub fn mark_row_copy_end_time(&self) {
        self.timing.lock().row_copy_end = Some(Instant::now());
    }

    /// Time spent copying rows.
    ///
    /// Zero before the copy starts, growing while it runs, and fixed once it has ended.
    pub fn elapsed_row_copy_time(&self) -> Duration {
        let timing = self.timing.lock();
        elapsed_between(timing.row_copy_start, timing.row_copy_end)
    }

    /// Record that cut-over started locking tables.
    pub fn mark_lock_tables_start_time(&self) {
        self.timing.lock().lock_tables_start = Some(Instant::now());
    }

    /// Time since cut-over started locking tables, zero if it has not.
    pub fn time_since_lock_tables_start(&self) -> Duration {
        elapsed_between(self.timing.lock().lock_tables_start, None)
    }

    /// Record that the rename started.
    pub fn mark_rename_tables_start_time(&self) {
        self.timing.lock().rename_tables_start = Some(Instant::now());
    }

    /// Record that the rename finished.
    pub fn mark_rename_tables_end_time(&self) {
        self.timing.lock().rename_tables_end = Some(Instant::now());
    }

    /// Duration of the rename, fixed once it has ended.
    pub fn elapsed_rename_time(&self) -> Duration {
        let timing = self.timing.lock();
        elapsed_between(timing.rename_tables_start, timing.rename_tables_end)
    }

    // Watchdog

    /// Stamp now as the point of interest. Returns the current iteration.
    pub fn mark_point_of_interest(&self) -> u64 {
        let mut mark = self.point_of_interest.lock();
        *mark = Instant::now();
        self.iteration()
    }

    /// Time since the last point of interest (or since creation when never marked).
    pub fn time_since_point_of_interest(&self) -> Duration {
        self.point_of_interest.lock().elapsed()
    }
}
