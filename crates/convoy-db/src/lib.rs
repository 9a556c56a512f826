//! Durable storage for the convoy control plane.
//!
//! Holds the compiled plan snapshot, per-task execution state, and the
//! success ledger in a single embedded SQLite database on the management
//! server. Execution state is written through as the scheduler progresses,
//! so a restarted service can recover interrupted plans, and the ledger
//! survives restarts with no loss.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
