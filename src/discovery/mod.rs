//! Service Discovery Module
//!
//! Finds a live instance of a named service, hands its address to a caller-supplied
//! handler and keeps watching it, failing over to another instance when it goes quiet.
//!
//! ## Cycle
//! - **Searching**: random pick among cached, non-excluded records; one full resync on a miss.
//!   Nothing left means the service is halted until the watchdog hears a heartbeat.
//! - **Verifying**: ask the candidate for an early heartbeat and wait for it. Silence excludes
//!   the candidate; a malformed token or a failing handler just retries.
//! - **Active**: keep receiving heartbeats; twice the advertised interval of silence is a
//!   lost connection and restarts the search.

pub mod engine;
pub mod select;
pub mod types;
