//! Distributed mutual exclusion (Ricart-Agrawala over Lamport clocks) with on-demand
//! Chandy-Lamport snapshots of the lock state.

pub mod actor;
pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod mutex;
pub mod operation;
pub mod peer;
pub mod poisson;
pub mod process;
pub mod request;
pub mod server;
pub mod sink;
pub mod snapshot;
pub mod validate;

pub type ProcessId = u32;
pub type Timestamp = u64;
pub type SnapshotId = u64;

/// Default rate of critical sections per second for the workload loop.
pub const RATE: f64 = 1.;
