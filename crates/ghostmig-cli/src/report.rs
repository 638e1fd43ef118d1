//! Startup report printed by the binary.

use ghostmig_core::{CutOverPlan, MigrationContext, MigrationStatus, ThrottleDecision, ThrottleSignals};
use serde::Serialize;
use tracing::info;

use crate::error::{CliError, Result};

/// Everything the binary reports about a configured migration.
#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub status: MigrationStatus,
    pub cut_over_plan: CutOverPlan,
}

impl MigrationReport {
    /// Check flag files once and describe the migration.
    ///
    /// Fails when the panic flag file is already present.
    pub fn build(ctx: &MigrationContext) -> Result<Self> {
        let decision = ThrottleDecision::evaluate(ctx, &ThrottleSignals::default());
        if let ThrottleDecision::Abort(reason) = &decision {
            return Err(CliError::Aborted(reason.clone()));
        }
        ctx.apply_throttle_decision(&decision);

        let cut_over_plan = CutOverPlan::for_context(ctx);
        for (index, step) in cut_over_plan.steps.iter().enumerate() {
            info!(step = index + 1, "{}", step);
        }

        Ok(Self {
            status: ctx.status(),
            cut_over_plan,
        })
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
