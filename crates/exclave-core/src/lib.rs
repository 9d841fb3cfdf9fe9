//! Exclave protocol core logic
//!
//! Pure state machine logic for Ricart-Agrawala-style distributed mutual
//! exclusion, completely decoupled from I/O. This enables deterministic
//! testing of every interleaving the network could produce.
//!
//! # Architecture
//!
//! The engine is a deterministic state machine isolated from I/O, time,
//! randomness, and scheduling. State transitions produce declarative
//! [`Action`]s that describe intended effects rather than executing them
//! directly. A runtime or test harness is responsible for interpreting
//! and executing these actions.
//!
//! This separation keeps protocol correctness independent of execution
//! concerns: the same engine runs under the production tokio event loop
//! and under the simulation harness that replays adversarial message
//! orders.
//!
//! # Components
//!
//! - [`engine`]: the mutual-exclusion engine (requests, permissions,
//!   deferred replies)
//! - [`snapshot`]: snapshot round bookkeeping layered on the same
//!   message stream
//! - [`error`]: engine error types

pub mod engine;
pub mod error;
pub mod snapshot;

pub use engine::{Action, Engine};
pub use error::EngineError;
pub use snapshot::SnapshotRound;
