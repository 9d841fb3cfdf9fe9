//! Exclave node runtime.
//!
//! Wires the pure [`exclave_core::Engine`] to the outside world: a link
//! transport delivering opaque text lines, an application-facing command
//! channel, and a per-process snapshot record log.
//!
//! # Components
//!
//! - [`link`]: transport abstraction and the TCP implementation
//! - [`node`]: the event-loop actor and its application handle
//! - [`record_log`]: append-only snapshot record file

pub mod link;
pub mod node;
pub mod record_log;

pub use link::{Link, TcpLink};
pub use node::{Command, Node, NodeConfig, NodeError, NodeHandle};
pub use record_log::RecordLog;
