//! Heartbeat-Driven Service Registration & Discovery
//!
//! Services announce themselves on a shared pub/sub key-value substrate and keep
//! emitting liveness tokens; consumers pick a live instance, watch its heartbeat and
//! fail over to another instance when it goes silent. There is no central scheduler:
//! liveness detection and failover are driven by timed waits on the substrate.
//!
//! ## Modules
//! - **`registry`**: Registration records and the `Registry` contract, with an in-process
//!   implementation over a shared durable store.
//! - **`transport`**: The `Transport` pub/sub contract (channels, notify, wait, publish,
//!   subscribe) and an in-process implementation.
//! - **`registration`**: The registration engine: weighted replica records, heartbeat
//!   publisher and ticker, resync listener, one-time stop.
//! - **`discovery`**: The discovery engine: random candidate selection, heartbeat
//!   verification, active monitoring, watchdog-driven recovery.
//! - **`common`**: Interval codec, local address lookup, interrupt hook.

pub mod common;
pub mod discovery;
pub mod registration;
pub mod registry;
pub mod transport;
