//! Shared helpers used by both engines.
//!
//! - **`interval`**: textual form of heartbeat intervals (the heartbeat token payload).
//! - **`net`**: best-effort discovery of this host's outward address.
//! - **`signal`**: process-interrupt hook used for deregistration on Ctrl-C.

pub mod interval;
pub mod net;
pub mod signal;
