//! Pub/Sub Transport Module
//!
//! The shared substrate heartbeats and liveness notifications travel over.
//!
//! ## Primitives
//! - **Channels**: named topics; a `ChannelHandle` only receives what is sent after it was opened.
//! - **Notify / Wait**: one-shot publish, and a bounded wait for the next value on a key.
//! - **Publish**: forwards a stream of tokens onto a topic until shut down.
//! - **Subscribe**: feeds messages to a callback until it accepts one or the timeout elapses.
//!
//! ## Topics
//! - `<name>`: liveness notifications carrying the announcing address.
//! - `<name>@<address>`: heartbeat tokens of one instance.
//! - `<name>@<address>#resync`: consumers asking that instance for an early heartbeat.

pub mod memory;
pub mod types;
