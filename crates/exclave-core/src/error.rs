//! Engine error types.

use exclave_proto::{MutexState, ProcessId};
use thiserror::Error;

/// Errors surfaced by the mutual-exclusion engine.
///
/// Command-interface misuse (`AlreadyRequested`, `NotHoldingSection`) is
/// a caller bug; message-level errors (`PeerOutOfRange`,
/// `UnexpectedPermission`) indicate a misbehaving peer and are safe to
/// log and drop, leaving local state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The membership list cannot host this process id.
    #[error("process id {id} is outside a membership of {n} processes")]
    InvalidMembership {
        /// Requested local process id.
        id: ProcessId,
        /// Size of the membership list.
        n: usize,
    },

    /// The membership list is too small for mutual exclusion.
    #[error("membership of {0} processes is too small, need at least 2")]
    MembershipTooSmall(usize),

    /// ENTER issued while a request is already outstanding or held.
    #[error("entry requested while already `{state}`")]
    AlreadyRequested {
        /// State at the time of the duplicate request.
        state: MutexState,
    },

    /// EXIT issued while not inside the critical section.
    #[error("release while `{state}`, expected `inMX`")]
    NotHoldingSection {
        /// State at the time of the bogus release.
        state: MutexState,
    },

    /// A permission arrived while no request was outstanding.
    #[error("permission from {from} while `{state}`")]
    UnexpectedPermission {
        /// Peer that sent the permission.
        from: ProcessId,
        /// Local state when it arrived.
        state: MutexState,
    },

    /// A message named a sender outside the membership, or this process
    /// itself.
    #[error("message from peer {from} not valid in a membership of {n}")]
    PeerOutOfRange {
        /// Claimed sender id.
        from: ProcessId,
        /// Size of the membership list.
        n: usize,
    },
}
