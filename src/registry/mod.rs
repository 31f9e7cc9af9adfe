//! Service Registry Module
//!
//! Holds the registration records that announce a service instance, indexed by
//! service name and then by record key.
//!
//! ## Components
//! - **`types`**: The `Record` entry and its `RecordKey`.
//! - **`store`**: The `Registry` contract consumed by both engines, and `InMemoryRegistry`,
//!   a process-local view over a `DurableStore` that several views may share.
//!
//! A service registered with weight *w* owns *w* records with distinct keys; random
//! selection over records is what biases discovery toward heavier instances.

pub mod store;
pub mod types;
