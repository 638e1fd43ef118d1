//! Throttle decisions.
//!
//! The throttler loop polls replicas, server status and the throttle query
//! at a fixed interval, gathers the readings into [`ThrottleSignals`] and
//! asks [`ThrottleDecision::evaluate`] what to do. Flag files, the operator
//! command and every threshold are read from the [`MigrationContext`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::context::MigrationContext;
use crate::instance::InstanceKey;

/// Whether a flag file is present. Empty paths never exist.
pub fn flag_file_exists(path: Option<&Path>) -> bool {
    match path {
        Some(path) if !path.as_os_str().is_empty() => path.exists(),
        _ => false,
    }
}

/// Readings gathered by one throttler poll.
#[derive(Debug, Clone, Default)]
pub struct ThrottleSignals {
    /// Measured replication lag per polled replica.
    pub replica_lag: Vec<(InstanceKey, Duration)>,
    /// Server status variables, e.g. `Threads_running`.
    pub status: BTreeMap<String, f64>,
    /// Result of the throttle query, if one is configured.
    pub throttle_query_result: Option<i64>,
}

impl ThrottleSignals {
    /// Highest lag among the polled replicas.
    pub fn max_replica_lag(&self) -> Option<(&InstanceKey, Duration)> {
        self.replica_lag
            .iter()
            .max_by_key(|(_, lag)| *lag)
            .map(|(key, lag)| (key, *lag))
    }
}

/// Outcome of one throttle check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Keep copying and applying.
    Proceed,
    /// Pause work for the given reason.
    Throttle(String),
    /// Stop the migration for the given reason.
    Abort(String),
}

impl ThrottleDecision {
    /// Decide from the context's settings and the latest readings.
    ///
    /// Abort conditions are checked first, then each throttle condition in
    /// turn; the first one met wins.
    pub fn evaluate(ctx: &MigrationContext, signals: &ThrottleSignals) -> Self {
        if flag_file_exists(ctx.panic_flag_file.as_deref()) {
            return ThrottleDecision::Abort("found panic-flag-file".to_string());
        }

        let reading = |name: &str| signals.status.get(name).copied();

        let critical_load = ctx.critical_load();
        if let Some((name, value, threshold)) = critical_load.first_exceeded(reading) {
            return ThrottleDecision::Abort(format!(
                "critical-load met: {}={} > {}",
                name, value, threshold
            ));
        }

        if flag_file_exists(ctx.throttle_flag_file.as_deref()) {
            return ThrottleDecision::Throttle("flag-file".to_string());
        }
        if flag_file_exists(ctx.throttle_additional_flag_file.as_deref()) {
            return ThrottleDecision::Throttle("flag-file".to_string());
        }
        if ctx.throttle_commanded_by_user() {
            return ThrottleDecision::Throttle("commanded by user".to_string());
        }

        let max_lag = Duration::from_millis(ctx.max_lag_milliseconds_throttle_threshold());
        if let Some((replica, lag)) = signals.max_replica_lag() {
            if lag > max_lag {
                return ThrottleDecision::Throttle(format!(
                    "lag={:.3}s on {}",
                    lag.as_secs_f64(),
                    replica
                ));
            }
        }

        if signals.throttle_query_result.is_some_and(|result| result > 0) {
            return ThrottleDecision::Throttle("throttle-query".to_string());
        }

        let max_load = ctx.max_load();
        if let Some((name, value, threshold)) = max_load.first_exceeded(reading) {
            return ThrottleDecision::Throttle(format!(
                "max-load {}={} > {}",
                name, value, threshold
            ));
        }

        ThrottleDecision::Proceed
    }

    /// Whether workers must pause.
    pub fn is_throttling(&self) -> bool {
        !matches!(self, ThrottleDecision::Proceed)
    }
}

impl MigrationContext {
    /// Record a decision in the throttle state.
    ///
    /// `Abort` is left to the caller, which tears the migration down.
    pub fn apply_throttle_decision(&self, decision: &ThrottleDecision) {
        match decision {
            ThrottleDecision::Proceed => self.set_throttled(false, ""),
            ThrottleDecision::Throttle(reason) => self.set_throttled(true, reason.as_str()),
            ThrottleDecision::Abort(reason) => {
                warn!(reason = %reason, "throttler requested abort");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals_with_status(pairs: &[(&str, f64)]) -> ThrottleSignals {
        ThrottleSignals {
            status: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_proceed_by_default() {
        let ctx = MigrationContext::new("db", "t");
        let decision = ThrottleDecision::evaluate(&ctx, &ThrottleSignals::default());
        assert_eq!(decision, ThrottleDecision::Proceed);
        assert!(!decision.is_throttling());
    }

    #[test]
    fn test_replica_lag_throttles() {
        let ctx = MigrationContext::new("db", "t");
        ctx.set_max_lag_milliseconds_throttle_threshold(1500);
        let signals = ThrottleSignals {
            replica_lag: vec![
                (InstanceKey::new("r1", 3306), Duration::from_millis(200)),
                (InstanceKey::new("r2", 3306), Duration::from_millis(2500)),
            ],
            ..Default::default()
        };

        match ThrottleDecision::evaluate(&ctx, &signals) {
            ThrottleDecision::Throttle(reason) => assert!(reason.contains("r2:3306")),
            other => panic!("expected throttle, got {:?}", other),
        }

        let calm = ThrottleSignals {
            replica_lag: vec![(InstanceKey::new("r1", 3306), Duration::from_millis(1500))],
            ..Default::default()
        };
        assert_eq!(ThrottleDecision::evaluate(&ctx, &calm), ThrottleDecision::Proceed);
    }

    #[test]
    fn test_max_load_throttles_and_critical_load_aborts() {
        let ctx = MigrationContext::new("db", "t");
        ctx.read_max_load("Threads_running=50").unwrap();
        ctx.read_critical_load("Threads_running=500").unwrap();

        let busy = signals_with_status(&[("Threads_running", 80.0)]);
        assert!(matches!(
            ThrottleDecision::evaluate(&ctx, &busy),
            ThrottleDecision::Throttle(reason) if reason.starts_with("max-load")
        ));

        let overloaded = signals_with_status(&[("Threads_running", 900.0)]);
        assert!(matches!(
            ThrottleDecision::evaluate(&ctx, &overloaded),
            ThrottleDecision::Abort(reason) if reason.starts_with("critical-load")
        ));
    }

    #[test]
    fn test_user_command_and_throttle_query() {
        let ctx = MigrationContext::new("db", "t");
        let query_hit = ThrottleSignals {
            throttle_query_result: Some(1),
            ..Default::default()
        };
        assert_eq!(
            ThrottleDecision::evaluate(&ctx, &query_hit),
            ThrottleDecision::Throttle("throttle-query".to_string())
        );

        ctx.set_throttle_commanded_by_user(true);
        assert_eq!(
            ThrottleDecision::evaluate(&ctx, &ThrottleSignals::default()),
            ThrottleDecision::Throttle("commanded by user".to_string())
        );
    }

    #[test]
    fn test_flag_files() {
        let dir = tempfile::tempdir().unwrap();
        let throttle_flag = dir.path().join("throttle.flag");
        let panic_flag = dir.path().join("panic.flag");

        let mut ctx = MigrationContext::new("db", "t");
        ctx.throttle_flag_file = Some(throttle_flag.clone());
        ctx.panic_flag_file = Some(panic_flag.clone());
        assert_eq!(
            ThrottleDecision::evaluate(&ctx, &ThrottleSignals::default()),
            ThrottleDecision::Proceed
        );

        std::fs::write(&throttle_flag, b"").unwrap();
        assert_eq!(
            ThrottleDecision::evaluate(&ctx, &ThrottleSignals::default()),
            ThrottleDecision::Throttle("flag-file".to_string())
        );

        std::fs::write(&panic_flag, b"").unwrap();
        assert!(matches!(
            ThrottleDecision::evaluate(&ctx, &ThrottleSignals::default()),
            ThrottleDecision::Abort(_)
        ));

        assert!(!flag_file_exists(None));
        assert!(!flag_file_exists(Some(Path::new(""))));
    }

    #[test]
    fn test_apply_decision() {
        let ctx = MigrationContext::new("db", "t");
        ctx.apply_throttle_decision(&ThrottleDecision::Throttle("lag=3s".to_string()));
        assert_eq!(ctx.is_throttled(), (true, "lag=3s".to_string()));

        ctx.apply_throttle_decision(&ThrottleDecision::Abort("panic".to_string()));
        assert_eq!(ctx.is_throttled(), (true, "lag=3s".to_string()));

        ctx.apply_throttle_decision(&ThrottleDecision::Proceed);
        assert_eq!(ctx.is_throttled(), (false, String::new()));
    }
}
