//! Wire format for the Exclave distributed mutual-exclusion protocol.
//!
//! Messages are short comma-delimited text records. The total order that
//! the algorithm depends on is explicit in message content (Lamport
//! timestamp plus sender id), so the transport only has to deliver opaque
//! lines; it never needs to preserve cross-peer ordering.
//!
//! Snapshot records use a second, space-delimited line format that is
//! written by the engine and consumed by the offline audit tool. Both
//! directions of that format live here so the engine and the auditor can
//! never drift apart.

pub mod errors;
pub mod message;
pub mod record;

pub use errors::ProtocolError;
pub use message::Message;
pub use record::{MutexState, ProcessRecord};

/// Index of a process in the globally known, fixed membership list.
///
/// Ids are dense in `[0, N)` and double as the tie-breaker of the
/// Lamport total order, so they must be identical on every process.
pub type ProcessId = usize;
