//! Ghostmig Core - shared state for online ghost-table schema migrations.
//!
//! A migration copies rows from the original table into a ghost table that
//! already carries the new schema, replays concurrent writes from the change
//! stream, and finally swaps the two tables. Every worker involved shares one
//! [`MigrationContext`] holding configuration, throttle state, progress and
//! timing.

pub mod context;
pub mod cutover;
pub mod error;
pub mod instance;
pub mod load_map;
pub mod schema;
pub mod status;
pub mod throttler;

pub use context::{
    ClientSection, ConfigFile, MigrationContext, MigrationMode, OscSection, RowsEstimateMethod,
    TableFacts,
};
pub use cutover::{CutOver, CutOverPlan, CutOverStep};
pub use error::{ContextError, Result};
pub use instance::{ConnectionConfig, InstanceKey, InstanceKeyMap};
pub use load_map::LoadMap;
pub use schema::{ColumnList, ColumnValue, ColumnValues, TableShape, UniqueKey};
pub use status::{MigrationStatus, ThrottleStatus};
pub use throttler::{flag_file_exists, ThrottleDecision, ThrottleSignals};
