use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a record, unique within a service name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecordKey(pub String);

impl RecordKey {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RecordKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single registration entry for one replica of a service instance.
///
/// `excluded` is set by a consumer that found the instance unresponsive; selection
/// skips excluded records. `refreshed_at` is the lease timestamp (ms since epoch)
/// extended by every heartbeat tick of the owning registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub name: String,
    pub address: String,
    pub excluded: bool,
    pub key: RecordKey,
    pub refreshed_at: u64,
}

impl Record {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            excluded: false,
            key: RecordKey::new(),
            refreshed_at: now_ms(),
        }
    }

    /// JSON rendering used in log lines.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Tuning for `InMemoryRegistry`.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Records whose lease is older than this are dropped on `pull_all`.
    /// `None` keeps records until they are removed explicitly.
    pub lease_ttl: Option<Duration>,
}

/// Current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
