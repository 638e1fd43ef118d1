//! Cut-over: swapping the ghost table into the original table's place.
//!
//! Two strategies are supported:
//!
//! - **Atomic**: both tables are locked and renamed in a single statement.
//!   Readers never observe a missing table.
//! - **Two-step**: the original is renamed away, then the ghost renamed into
//!   place. There is a brief window where the table name does not resolve.
//!
//! This module only describes the sequence. Executing it is the applier's job;
//! it must hold locks for at most the context's cut-over lock timeout.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::context::MigrationContext;
use crate::error::ContextError;

/// Cut-over strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CutOver {
    /// Lock and rename both tables in one statement.
    #[default]
    Atomic,
    /// Rename the original away, then rename the ghost into place.
    TwoStep,
}

impl fmt::Display for CutOver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutOver::Atomic => write!(f, "atomic"),
            CutOver::TwoStep => write!(f, "two-step"),
        }
    }
}

impl FromStr for CutOver {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" | "" => Ok(CutOver::Atomic),
            "two-step" => Ok(CutOver::TwoStep),
            _ => Err(ContextError::parse(
                "cut-over type",
                s,
                "expected atomic or two-step",
            )),
        }
    }
}

/// One step of the cut-over sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CutOverStep {
    /// Take the named voluntary lock so only one coordinator cuts over.
    AcquireVoluntaryLock {
        /// Lock name.
        lock_name: String,
    },
    /// `LOCK TABLES ... WRITE` on the listed tables.
    LockTables {
        /// Tables to lock.
        tables: Vec<String>,
    },
    /// Rename one table.
    RenameTable {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Rename the original away and the ghost into place in one statement.
    SwapTables {
        /// The table being replaced.
        original: String,
        /// Name the original table gets.
        old: String,
        /// The table taking its place.
        ghost: String,
    },
    /// `UNLOCK TABLES`.
    UnlockTables,
    /// Release the voluntary lock.
    ReleaseVoluntaryLock {
        /// Lock name.
        lock_name: String,
    },
}

impl fmt::Display for CutOverStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutOverStep::AcquireVoluntaryLock { lock_name } => {
                write!(f, "acquire lock {}", lock_name)
            }
            CutOverStep::LockTables { tables } => write!(f, "lock tables {}", tables.join(", ")),
            CutOverStep::RenameTable { from, to } => write!(f, "rename {} to {}", from, to),
            CutOverStep::SwapTables {
                original,
                old,
                ghost,
            } => write!(f, "rename {} to {}, {} to {}", original, old, ghost, original),
            CutOverStep::UnlockTables => write!(f, "unlock tables"),
            CutOverStep::ReleaseVoluntaryLock { lock_name } => {
                write!(f, "release lock {}", lock_name)
            }
        }
    }
}

/// The resolved cut-over sequence for one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutOverPlan {
    /// Strategy the steps implement.
    pub strategy: CutOver,
    /// Longest time any step may hold table locks, in seconds.
    pub lock_timeout_seconds: u64,
    /// Steps in execution order.
    pub steps: Vec<CutOverStep>,
}

impl CutOverPlan {
    /// Build the plan from the context's strategy, names and lock timeout.
    pub fn for_context(ctx: &MigrationContext) -> Self {
        let original = ctx.original_table_name.clone();
        let ghost = ctx.ghost_table_name();
        let old = ctx.old_table_name();
        let lock_name = ctx.voluntary_lock_name();

        let steps = match ctx.cut_over_type {
            CutOver::Atomic => vec![
                CutOverStep::AcquireVoluntaryLock {
                    lock_name: lock_name.clone(),
                },
                CutOverStep::LockTables {
                    tables: vec![original.clone(), ghost.clone()],
                },
                CutOverStep::SwapTables {
                    original,
                    old,
                    ghost,
                },
                CutOverStep::UnlockTables,
                CutOverStep::ReleaseVoluntaryLock { lock_name },
            ],
            CutOver::TwoStep => vec![
                CutOverStep::LockTables {
                    tables: vec![original.clone()],
                },
                CutOverStep::RenameTable {
                    from: original.clone(),
                    to: old,
                },
                CutOverStep::UnlockTables,
                CutOverStep::RenameTable {
                    from: ghost,
                    to: original,
                },
            ],
        };

        Self {
            strategy: ctx.cut_over_type,
            lock_timeout_seconds: ctx.cut_over_lock_timeout_seconds(),
            steps,
        }
    }

    /// Whether the plan has a moment where the original name does not resolve.
    pub fn has_table_gap(&self) -> bool {
        self.strategy == CutOver::TwoStep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MigrationMode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_cut_over() {
        assert_eq!("atomic".parse::<CutOver>().unwrap(), CutOver::Atomic);
        assert_eq!("Two-Step".parse::<CutOver>().unwrap(), CutOver::TwoStep);
        assert_eq!("".parse::<CutOver>().unwrap(), CutOver::Atomic);
        assert!("three-step".parse::<CutOver>().is_err());
        assert_eq!(CutOver::TwoStep.to_string(), "two-step");
    }

    #[test]
    fn test_atomic_plan() {
        let ctx = MigrationContext::new("shop", "orders");
        ctx.set_cut_over_lock_timeout_seconds(5).unwrap();
        let plan = CutOverPlan::for_context(&ctx);

        assert_eq!(plan.strategy, CutOver::Atomic);
        assert_eq!(plan.lock_timeout_seconds, 5);
        assert!(!plan.has_table_gap());
        assert_eq!(
            plan.steps,
            vec![
                CutOverStep::AcquireVoluntaryLock {
                    lock_name: "shop.orders.lock".to_string()
                },
                CutOverStep::LockTables {
                    tables: vec!["orders".to_string(), "_orders_gho".to_string()]
                },
                CutOverStep::SwapTables {
                    original: "orders".to_string(),
                    old: "_orders_del".to_string(),
                    ghost: "_orders_gho".to_string(),
                },
                CutOverStep::UnlockTables,
                CutOverStep::ReleaseVoluntaryLock {
                    lock_name: "shop.orders.lock".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_two_step_plan() {
        let mut ctx = MigrationContext::new("shop", "orders");
        ctx.cut_over_type = CutOver::TwoStep;
        ctx.mode = MigrationMode::MigrateOnReplica;
        let plan = CutOverPlan::for_context(&ctx);

        assert!(plan.has_table_gap());
        let rendered: Vec<String> = plan.steps.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "lock tables orders",
                "rename orders to _orders_ghr",
                "unlock tables",
                "rename _orders_gho to orders",
            ]
        );
    }
}
