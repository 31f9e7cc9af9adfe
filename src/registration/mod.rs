//! Service Registration Module
//!
//! Announces a service instance on the shared substrate and keeps it alive.
//!
//! ## Lifecycle
//! 1. **Register**: `weight` records are inserted for the instance and a sync announcement is broadcast.
//! 2. **Heartbeat**: a cycle task pushes the interval token, notifies the liveness channel
//!    and refreshes the record leases, immediately and then once per interval.
//! 3. **Resync**: consumers asking for an early heartbeat get one without disturbing the schedule.
//! 4. **Stop**: a one-time stop signal tears the tasks down and removes the records.
//!    An interrupt hook performs the same removal if the process is killed with Ctrl-C.

pub mod cycle;
pub mod engine;
pub mod types;

#[cfg(test)]
mod tests;
