//! Throttling state: the throttled flag and the settings the throttler reads.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{MigrationContext, DEFAULT_NUM_RETRIES, MAX_NICE_RATIO};
use crate::error::{ContextError, Result};
use crate::instance::{InstanceKey, InstanceKeyMap};
use crate::load_map::LoadMap;

/// Everything guarded by the throttle mutex.
#[derive(Debug)]
pub(super) struct ThrottleState {
    is_throttled: bool,
    reason: String,
    replication_lag_query: String,
    throttle_query: String,
    max_load: LoadMap,
    critical_load: LoadMap,
    nice_ratio: f64,
    control_replica_keys: InstanceKeyMap,
    default_num_retries: u64,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self {
            is_throttled: false,
            reason: String::new(),
            replication_lag_query: String::new(),
            throttle_query: String::new(),
            max_load: LoadMap::new(),
            critical_load: LoadMap::new(),
            nice_ratio: 0.0,
            control_replica_keys: InstanceKeyMap::new(),
            default_num_retries: DEFAULT_NUM_RETRIES,
        }
    }
}

impl MigrationContext {
    /// Record the throttler's latest decision. The reason is cleared when not throttled.
    pub fn set_throttled(&self, throttle: bool, reason: impl Into<String>) {
        let reason = if throttle { reason.into() } else { String::new() };
        let mut state = self.throttle.lock();
        if state.is_throttled != throttle {
            if throttle {
                info!(reason = %reason, "throttling");
            } else {
                info!(previous_reason = %state.reason, "throttling released");
            }
        }
        state.is_throttled = throttle;
        state.reason = reason;
    }

    /// Whether work is paused, and why. Both values come from the same decision.
    pub fn is_throttled(&self) -> (bool, String) {
        let state = self.throttle.lock();
        (state.is_throttled, state.reason.clone())
    }

    /// Query returning replica lag in seconds, when the default heartbeat is not used.
    pub fn replication_lag_query(&self) -> String {
        self.throttle.lock().replication_lag_query.clone()
    }

    /// Replace the replica lag query.
    pub fn set_replication_lag_query(&self, query: impl Into<String>) {
        self.throttle.lock().replication_lag_query = query.into();
    }

    /// Query whose positive result throttles work.
    pub fn throttle_query(&self) -> String {
        self.throttle.lock().throttle_query.clone()
    }

    /// Replace the throttle query.
    pub fn set_throttle_query(&self, query: impl Into<String>) {
        self.throttle.lock().throttle_query = query.into();
    }

    /// Copy of the max-load thresholds.
    pub fn max_load(&self) -> LoadMap {
        self.throttle.lock().max_load.clone()
    }

    /// Copy of the critical-load thresholds.
    pub fn critical_load(&self) -> LoadMap {
        self.throttle.lock().critical_load.clone()
    }

    /// Parse and install max-load thresholds, e.g.
    /// `Threads_running=100,Threads_connected=500`.
    ///
    /// Nothing changes when parsing fails.
    pub fn read_max_load(&self, max_load_list: &str) -> Result<()> {
        let load_map = LoadMap::parse(max_load_list)?;
        debug!(max_load = %load_map, "max-load updated");
        self.throttle.lock().max_load = load_map;
        Ok(())
    }

    /// Parse and install critical-load thresholds. Nothing changes when parsing fails.
    pub fn read_critical_load(&self, critical_load_list: &str) -> Result<()> {
        let load_map = LoadMap::parse(critical_load_list)?;
        debug!(critical_load = %load_map, "critical-load updated");
        self.throttle.lock().critical_load = load_map;
        Ok(())
    }

    /// Current nice ratio.
    pub fn nice_ratio(&self) -> f64 {
        self.throttle.lock().nice_ratio
    }

    /// Set the nice ratio, clamped into [0, 100].
    pub fn set_nice_ratio(&self, ratio: f64) {
        let ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, MAX_NICE_RATIO)
        };
        self.throttle.lock().nice_ratio = ratio;
    }

    /// Voluntary sleep after a unit of work that took `elapsed`.
    ///
    /// A ratio of 1 sleeps as long as the work took; 0 never sleeps.
    /// Saturates at `Duration::MAX`.
    pub fn nice_sleep_for(&self, elapsed: Duration) -> Duration {
        Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.nice_ratio())
            .unwrap_or(Duration::MAX)
    }

    /// Copy of the replicas whose lag is polled.
    pub fn throttle_control_replica_keys(&self) -> InstanceKeyMap {
        self.throttle.lock().control_replica_keys.clone()
    }

    /// Replace the polled replicas from a comma-delimited `host[:port]` list.
    ///
    /// Nothing changes when any entry is invalid.
    pub fn read_throttle_control_replica_keys(&self, replicas: &str) -> Result<()> {
        let keys = InstanceKeyMap::parse_comma_delimited(replicas)?;
        debug!(replicas = %keys, "throttle control replicas updated");
        self.throttle.lock().control_replica_keys = keys;
        Ok(())
    }

    /// Add one replica to the polled set.
    pub fn add_throttle_control_replica_key(&self, key: InstanceKey) {
        self.throttle.lock().control_replica_keys.add_key(key);
    }

    /// Set the retry budget. Only positive values are accepted.
    pub fn set_default_num_retries(&self, retries: i64) -> Result<()> {
        if retries <= 0 {
            warn!(requested = retries, "retry count rejected");
            return Err(ContextError::validation(
                "retry count",
                format!("must be positive, got {}", retries),
            ));
        }
        self.throttle.lock().default_num_retries = retries as u64;
        Ok(())
    }

    /// Retry budget for transient failures.
    pub fn max_retries(&self) -> u64 {
        self.throttle.lock().default_num_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_throttled_pairs_flag_and_reason() {
        let ctx = MigrationContext::new("db", "t");
        assert_eq!(ctx.is_throttled(), (false, String::new()));

        ctx.set_throttled(true, "lag=3.2s");
        assert_eq!(ctx.is_throttled(), (true, "lag=3.2s".to_string()));

        ctx.set_throttled(false, "ignored");
        assert_eq!(ctx.is_throttled(), (false, String::new()));
    }

    #[test]
    fn test_read_max_load_keeps_previous_on_error() {
        let ctx = MigrationContext::new("db", "t");
        ctx.read_max_load("Threads_running=100,Threads_connected=500")
            .unwrap();
        let before = ctx.max_load();
        assert_eq!(before.len(), 2);

        assert!(ctx.read_max_load("Threads_running=abc").is_err());
        assert_eq!(ctx.max_load(), before);
    }

    #[test]
    fn test_load_maps_are_copies() {
        let ctx = MigrationContext::new("db", "t");
        ctx.read_critical_load("Threads_running=1000").unwrap();

        let mut copy = ctx.critical_load();
        copy.insert("Threads_running", 1.0);
        copy.insert("Other", 2.0);

        let fresh = ctx.critical_load();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.get("Threads_running"), Some(1000.0));
    }

    #[test]
    fn test_nice_ratio() {
        let ctx = MigrationContext::new("db", "t");
        ctx.set_nice_ratio(-1.0);
        assert_eq!(ctx.nice_ratio(), 0.0);
        ctx.set_nice_ratio(250.0);
        assert_eq!(ctx.nice_ratio(), 100.0);
        ctx.set_nice_ratio(f64::NAN);
        assert_eq!(ctx.nice_ratio(), 0.0);

        ctx.set_nice_ratio(0.5);
        assert_eq!(
            ctx.nice_sleep_for(Duration::from_millis(200)),
            Duration::from_millis(100)
        );

        ctx.set_nice_ratio(100.0);
        assert_eq!(
            ctx.nice_sleep_for(Duration::from_secs(u64::MAX / 50)),
            Duration::MAX
        );
        ctx.set_nice_ratio(0.0);
        assert_eq!(ctx.nice_sleep_for(Duration::MAX), Duration::ZERO);
    }

    #[test]
    fn test_replica_keys() {
        let ctx = MigrationContext::new("db", "t");
        ctx.read_throttle_control_replica_keys("r1,r2:3307").unwrap();
        assert_eq!(ctx.throttle_control_replica_keys().len(), 2);

        assert!(ctx.read_throttle_control_replica_keys("r3,:1").is_err());
        assert_eq!(ctx.throttle_control_replica_keys().len(), 2);

        ctx.add_throttle_control_replica_key(InstanceKey::new("r3", 3306));
        assert_eq!(ctx.throttle_control_replica_keys().len(), 3);
    }

    #[test]
    fn test_retries() {
        let ctx = MigrationContext::new("db", "t");
        ctx.set_default_num_retries(5).unwrap();
        assert_eq!(ctx.max_retries(), 5);
        assert!(ctx.set_default_num_retries(0).is_err());
        assert!(ctx.set_default_num_retries(-1).is_err());
        assert_eq!(ctx.max_retries(), 5);
    }

    #[test]
    fn test_queries() {
        let ctx = MigrationContext::new("db", "t");
        ctx.set_replication_lag_query("select lag from meta.heartbeat");
        ctx.set_throttle_query("select 0");
        assert_eq!(ctx.replication_lag_query(), "select lag from meta.heartbeat");
        assert_eq!(ctx.throttle_query(), "select 0");
    }
}
