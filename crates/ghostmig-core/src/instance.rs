//! Database instance identifiers and connection descriptors.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ContextError, Result};

/// Port assumed when an instance key omits one.
pub const DEFAULT_PORT: u16 = 3306;

/// A `host:port` pair identifying one database server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct InstanceKey {
    /// Hostname or address.
    pub hostname: String,
    /// TCP port.
    pub port: u16,
}

impl InstanceKey {
    /// Create a key from a hostname and port.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Parse `host[:port]`, defaulting the port to 3306.
    pub fn parse_loose(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (hostname, port) = match raw.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ContextError::parse("instance key", raw, "invalid port"))?;
                (host, port)
            }
            None => (raw, DEFAULT_PORT),
        };
        if hostname.is_empty() {
            return Err(ContextError::parse("instance key", raw, "empty hostname"));
        }
        if port == 0 {
            return Err(ContextError::parse("instance key", raw, "port must be positive"));
        }
        Ok(Self::new(hostname, port))
    }

    /// Whether a hostname has been set.
    pub fn is_valid(&self) -> bool {
        !self.hostname.is_empty() && self.port > 0
    }
}

impl FromStr for InstanceKey {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_loose(s)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// A set of instance keys, e.g. the replicas whose lag drives throttling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceKeyMap {
    keys: BTreeSet<InstanceKey>,
}

impl InstanceKeyMap {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-delimited list of `host[:port]` entries.
    ///
    /// An empty list yields an empty set. Any invalid entry fails the whole read.
    pub fn parse_comma_delimited(list: &str) -> Result<Self> {
        let mut map = Self::new();
        if list.trim().is_empty() {
            return Ok(map);
        }
        for token in list.split(',') {
            map.add_key(InstanceKey::parse_loose(token)?);
        }
        Ok(map)
    }

    /// Add a key. Returns `false` if it was already present.
    pub fn add_key(&mut self, key: InstanceKey) -> bool {
        self.keys.insert(key)
    }

    /// Add several keys.
    pub fn add_keys(&mut self, keys: impl IntoIterator<Item = InstanceKey>) {
        self.keys.extend(keys);
    }

    /// Whether the key is present.
    pub fn has_key(&self, key: &InstanceKey) -> bool {
        self.keys.contains(key)
    }

    /// Keys in sorted order.
    pub fn instance_keys(&self) -> Vec<InstanceKey> {
        self.keys.iter().cloned().collect()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Display for InstanceKeyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

/// How to reach a database server.
#[derive(Clone, Default)]
pub struct ConnectionConfig {
    /// Key the operator supplied.
    pub key: InstanceKey,
    /// Key the server reported for itself (e.g. `@@hostname`), once known.
    pub implied_key: Option<InstanceKey>,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
}

impl ConnectionConfig {
    /// Create a descriptor for the given key with no credentials.
    pub fn new(key: InstanceKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    /// Copy of this descriptor pointing at another instance, sharing credentials.
    pub fn duplicate_for(&self, key: InstanceKey) -> Self {
        Self {
            key,
            implied_key: None,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    /// Whether both descriptors reach the same server.
    ///
    /// Either the supplied keys match, or both servers reported the same implied key.
    pub fn same_instance(&self, other: &ConnectionConfig) -> bool {
        if self.key == other.key {
            return true;
        }
        matches!(
            (&self.implied_key, &other.implied_key),
            (Some(a), Some(b)) if a == b
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("key", &self.key)
            .field("implied_key", &self.implied_key)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
