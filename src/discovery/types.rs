use anyhow::Result;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// How long the watchdog waits for a liveness notification before re-arming.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(3600);

/// Heartbeat intervals of silence tolerated before an active instance counts as lost.
pub const LIVENESS_MULTIPLIER: u32 = 2;

/// Type-erased async callback receiving the address of a verified instance.
/// An `Err` makes discovery move on to another instance.
pub type DiscoveryHandler =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub watchdog_timeout: Duration,
    pub liveness_multiplier: u32,
    /// Address sent along with resync requests. Defaults to this host's outward address.
    pub client_address: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: WATCHDOG_TIMEOUT,
            liveness_multiplier: LIVENESS_MULTIPLIER,
            client_address: None,
        }
    }
}

/// Why a discovery cycle went back to searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The candidate sent no heartbeat within the wait timeout. It is excluded.
    HeartbeatTimeout,
    /// The heartbeat token was not an interval.
    MalformedHeartbeat,
    /// The caller's handler rejected the instance.
    HandlerFailed,
    /// An active instance stopped heartbeating.
    ConnectionLost,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::MalformedHeartbeat => write!(f, "malformed heartbeat"),
            Self::HandlerFailed => write!(f, "handler failure"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}
