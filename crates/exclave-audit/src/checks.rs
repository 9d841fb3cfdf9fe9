//! Invariant checks over a global snapshot.
//!
//! These mirror the invariants the protocol is supposed to preserve at
//! every consistent cut:
//!
//! 1. at most one process in the section;
//! 2. all idle implies no deferred flags and no recorded in-transit
//!    messages;
//! 3. a held deferred flag implies the holder wants or holds the
//!    section;
//! 4. a wanting process has strictly fewer replies than the quorum
//!    (the local-counter subset of full reply accounting);
//! 5. request timestamps are positive while wanting/holding and never
//!    ahead of the clock.

use exclave_proto::{MutexState, ProcessId};
use thiserror::Error;

use crate::loader::GlobalSnapshot;

/// A single invariant violation found in one round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// More than one process captured `inMX`.
    #[error("processes {holders:?} are in the critical section simultaneously")]
    MultipleHolders {
        /// Every process captured in the section.
        holders: Vec<ProcessId>,
    },

    /// All processes idle, yet a deferred flag is set.
    #[error("process {process} defers peer {peer} while every process is idle")]
    DeferredWhileQuiescent {
        /// Process holding the flag.
        process: ProcessId,
        /// Peer the flag is held for.
        peer: ProcessId,
    },

    /// All processes idle, yet in-transit messages were recorded.
    #[error("process {process} recorded in-transit messages while every process is idle")]
    InTransitWhileQuiescent {
        /// Process that recorded the messages.
        process: ProcessId,
    },

    /// A deferred flag held by a process that neither wants nor holds
    /// the section.
    #[error("process {process} defers peer {peer} while `{state}`")]
    DeferredWithoutClaim {
        /// Process holding the flag.
        process: ProcessId,
        /// Peer the flag is held for.
        peer: ProcessId,
        /// The holder's captured state.
        state: MutexState,
    },

    /// A wanting process captured a full quorum of replies.
    #[error("process {process} is `wantMX` with {replies} replies, quorum is {quorum}")]
    ReplyOverrun {
        /// The wanting process.
        process: ProcessId,
        /// Replies it captured.
        replies: usize,
        /// Replies that would complete its request.
        quorum: usize,
    },

    /// Wanting/holding with a zero request timestamp.
    #[error("process {process} is `{state}` with no request timestamp")]
    MissingRequestTimestamp {
        /// The offending process.
        process: ProcessId,
        /// Its captured state.
        state: MutexState,
    },

    /// A request timestamp ahead of the process's own clock.
    #[error("process {process} has requestTimestamp {request_ts} > clock {clock}")]
    TimestampAheadOfClock {
        /// The offending process.
        process: ProcessId,
        /// Its captured request timestamp.
        request_ts: u64,
        /// Its captured clock.
        clock: u64,
    },
}

impl GlobalSnapshot {
    /// Run every invariant check, collecting all violations.
    pub fn check(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_single_holder(&mut violations);
        self.check_quiescence(&mut violations);
        self.check_deferred_claims(&mut violations);
        self.check_reply_accounting(&mut violations);
        self.check_timestamps(&mut violations);
        violations
    }

    /// At most one process in the critical section.
    fn check_single_holder(&self, violations: &mut Vec<Violation>) {
        let holders: Vec<ProcessId> = self
            .processes
            .iter()
            .enumerate()
            .filter(|(_, record)| record.state == MutexState::InSection)
            .map(|(process, _)| process)
            .collect();
        if holders.len() > 1 {
            violations.push(Violation::MultipleHolders { holders });
        }
    }

    /// If every process is idle, nothing may be deferred or in
    /// transit.
    fn check_quiescence(&self, violations: &mut Vec<Violation>) {
        let all_idle =
            self.processes.iter().all(|record| record.state == MutexState::NotWanting);
        if !all_idle {
            return;
        }
        for (process, record) in self.processes.iter().enumerate() {
            for (peer, &flag) in record.deferred.iter().enumerate() {
                if flag {
                    violations.push(Violation::DeferredWhileQuiescent { process, peer });
                }
            }
            if !record.in_transit.is_empty() {
                violations.push(Violation::InTransitWhileQuiescent { process });
            }
        }
    }

    /// A deferred flag implies its holder wants or holds the
    /// section.
    fn check_deferred_claims(&self, violations: &mut Vec<Violation>) {
        for (process, record) in self.processes.iter().enumerate() {
            if record.state != MutexState::NotWanting {
                continue;
            }
            for (peer, &flag) in record.deferred.iter().enumerate() {
                if flag {
                    violations.push(Violation::DeferredWithoutClaim {
                        process,
                        peer,
                        state: record.state,
                    });
                }
            }
        }
    }

    /// A wanting process cannot have collected the full quorum,
    /// because the last reply transitions it into the section
    /// atomically. This is the subset of reply accounting provable
    /// from process-local counters.
    fn check_reply_accounting(&self, violations: &mut Vec<Violation>) {
        let quorum = self.membership_size().saturating_sub(1);
        for (process, record) in self.processes.iter().enumerate() {
            if record.state == MutexState::Wanting && record.pending_replies >= quorum {
                violations.push(Violation::ReplyOverrun {
                    process,
                    replies: record.pending_replies,
                    quorum,
                });
            }
        }
    }

    /// Timestamp consistency.
    fn check_timestamps(&self, violations: &mut Vec<Violation>) {
        for (process, record) in self.processes.iter().enumerate() {
            if record.state != MutexState::NotWanting && record.request_ts == 0 {
                violations.push(Violation::MissingRequestTimestamp {
                    process,
                    state: record.state,
                });
            }
            if record.request_ts > record.clock {
                violations.push(Violation::TimestampAheadOfClock {
                    process,
                    request_ts: record.request_ts,
                    clock: record.clock,
                });
            }
        }
    }
}
