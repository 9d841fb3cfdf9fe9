//! Offline consistency checker for snapshot records.
//!
//! Each process appends one record line per snapshot round to its own
//! `snapshot<id>` file. This crate reassembles the global snapshot of
//! each round (the same line across every file), then validates the
//! protocol invariants against it.
//!
//! The engine records no channel state, so the reply-accounting check
//! is scoped to what process-local counters can prove; full in-flight
//! verification needs a channel-recording snapshot protocol and lives
//! in the simulation harness instead.

pub mod checks;
pub mod loader;

pub use checks::Violation;
pub use loader::{AuditError, GlobalSnapshot, load_dir};
