//! Load thresholds keyed by server status metric.
//!
//! A load map is parsed from a flag such as
//! `Threads_running=100,Threads_connected=500` and is used both as the soft
//! `max-load` bound (pace the migration) and the hard `critical-load` bound
//! (abort it).

use std::fmt;

use crate::error::{ContextError, Result};

/// Ordered mapping of metric name to threshold.
///
/// Order follows the input and only matters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadMap {
    entries: Vec<(String, f64)>,
}

impl LoadMap {
    /// Create an empty load map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of `Name=Value` pairs.
    ///
    /// An empty string yields an empty map. Any malformed pair fails the whole parse.
    pub fn parse(load_list: &str) -> Result<Self> {
        let mut map = Self::new();
        if load_list.trim().is_empty() {
            return Ok(map);
        }

        for condition in load_list.split(',') {
            let mut tokens = condition.split('=');
            let (name, value) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(name), Some(value), None) => (name.trim(), value.trim()),
                _ => {
                    return Err(ContextError::parse(
                        "load condition",
                        condition,
                        "expected Name=Value",
                    ))
                }
            };
            if name.is_empty() {
                return Err(ContextError::parse(
                    "load condition",
                    condition,
                    "missing status variable name",
                ));
            }
            let threshold: f64 = value.parse().map_err(|_| {
                ContextError::parse("load condition", condition, "value is not numeric")
            })?;
            if !threshold.is_finite() {
                return Err(ContextError::parse(
                    "load condition",
                    condition,
                    "value is not finite",
                ));
            }
            map.insert(name, threshold);
        }

        Ok(map)
    }

    /// Set a threshold, keeping the original position of an existing metric.
    pub fn insert(&mut self, name: impl Into<String>, threshold: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = threshold,
            None => self.entries.push((name, threshold)),
        }
    }

    /// Threshold configured for a metric.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, threshold)| *threshold)
    }

    /// Whether `value` is above the configured threshold for `name`.
    ///
    /// Unconfigured metrics never exceed.
    pub fn exceeds(&self, name: &str, value: f64) -> bool {
        self.get(name).is_some_and(|threshold| value > threshold)
    }

    /// First configured metric whose reading is above its threshold.
    ///
    /// `reading` returns the current value of a metric, or `None` when it
    /// was not measured.
    pub fn first_exceeded<F>(&self, mut reading: F) -> Option<(&str, f64, f64)>
    where
        F: FnMut(&str) -> Option<f64>,
    {
        self.entries.iter().find_map(|(name, threshold)| {
            reading(name)
                .filter(|value| value > threshold)
                .map(|value| (name.as_str(), value, *threshold))
        })
    }

    /// Iterate over `(metric, threshold)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), *t))
    }

    /// Number of configured metrics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no metrics are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for LoadMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, threshold)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", name, threshold)?;
        }
        Ok(())
    }
}
