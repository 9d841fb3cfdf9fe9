//! Mutual-exclusion engine.
//!
//! Ricart-Agrawala-style permission protocol: a process that wants the
//! critical section broadcasts a timestamped request and may enter once
//! all `N-1` peers have granted. A peer grants immediately unless it is
//! inside the section or has an earlier outstanding request of its own,
//! in which case the reply is deferred until it exits.
//!
//! # Architecture: Action-Based State Machine
//!
//! This state machine follows the action pattern:
//! - Methods accept one event (command or message) and run to completion
//! - Methods return `Result<Vec<Action>, EngineError>`
//! - Driver code executes actions (send messages, signal grants, persist
//!   snapshot records)
//!
//! The driver must process one event at a time; that serialization is
//! what makes every transition atomic without locks.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  request_entry   ┌─────────┐  N-1 permissions  ┌───────────┐
//! │ NotWanting │─────────────────>│ Wanting │──────────────────>│ InSection │
//! └────────────┘                  └─────────┘                   └───────────┘
//!        ▲                                                            │
//!        │                        release                             │
//!        └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Ordering
//!
//! Requests are ordered by `(timestamp, id)` with the smaller pair
//! winning. Every process computes the identical total order from the
//! same message content, so two processes can never both believe they
//! have priority; that is the whole mutual-exclusion argument. Arrival
//! order and wall-clock time play no part in the decision.

use exclave_proto::{Message, MutexState, ProcessId, ProcessRecord};

use crate::{error::EngineError, snapshot::SnapshotRound};

/// Effects requested by the engine.
///
/// The driver (node event loop or simulation harness) executes these:
/// - `Send`: encode and hand the message to the link transport
/// - `Grant`: signal the application that it may enter the section
/// - `Record`: persist a completed snapshot record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `message` to the peer with id `to`.
    Send {
        /// Destination process.
        to: ProcessId,
        /// Message to deliver.
        message: Message,
    },

    /// Signal the application that the critical section is held.
    Grant,

    /// Persist the record of a completed snapshot round.
    Record(ProcessRecord),
}

/// Per-process mutual-exclusion engine.
///
/// Owns the local protocol state exclusively; the driver feeds it one
/// event at a time and never shares it across tasks.
#[derive(Debug, Clone)]
pub struct Engine {
    id: ProcessId,
    n: usize,
    state: MutexState,
    clock: u64,
    request_ts: u64,
    pending_replies: usize,
    deferred: Vec<bool>,
    snapshot: SnapshotRound,
}

impl Engine {
    /// Create an engine for process `id` in a fixed membership of `n`
    /// processes.
    ///
    /// # Errors
    ///
    /// Rejects memberships smaller than two processes and ids outside
    /// `[0, n)`.
    pub fn new(id: ProcessId, n: usize) -> Result<Self, EngineError> {
        if n < 2 {
            return Err(EngineError::MembershipTooSmall(n));
        }
        if id >= n {
            return Err(EngineError::InvalidMembership { id, n });
        }
        Ok(Self {
            id,
            n,
            state: MutexState::NotWanting,
            clock: 0,
            request_ts: 0,
            pending_replies: 0,
            deferred: vec![false; n],
            snapshot: SnapshotRound::new(),
        })
    }

    /// Local process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Size of the fixed membership.
    pub fn membership_size(&self) -> usize {
        self.n
    }

    /// Current mutual-exclusion state.
    pub fn state(&self) -> MutexState {
        self.state
    }

    /// Current Lamport clock.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Timestamp of the current/last entry request.
    pub fn request_timestamp(&self) -> u64 {
        self.request_ts
    }

    /// Permissions received for the current request.
    pub fn pending_replies(&self) -> usize {
        self.pending_replies
    }

    /// Deferred-reply flags, indexed by peer id.
    pub fn deferred(&self) -> &[bool] {
        &self.deferred
    }

    /// Whether a snapshot round is in progress.
    pub fn snapshot_active(&self) -> bool {
        self.snapshot.is_active()
    }

    /// Permissions required before entering the section.
    fn quorum(&self) -> usize {
        self.n - 1
    }

    /// Handle ENTER from the application.
    ///
    /// Advances the clock, stamps the request, broadcasts it to every
    /// peer, and moves to `Wanting`. The grant arrives asynchronously
    /// once the last permission is delivered.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRequested` if a request is already outstanding or
    /// the section is held.
    pub fn request_entry(&mut self) -> Result<Vec<Action>, EngineError> {
        if self.state != MutexState::NotWanting {
            return Err(EngineError::AlreadyRequested { state: self.state });
        }

        self.clock += 1;
        self.request_ts = self.clock;
        self.pending_replies = 0;
        self.state = MutexState::Wanting;

        Ok(self.broadcast(Message::EntryRequest { from: self.id, timestamp: self.request_ts }))
    }

    /// Handle EXIT from the application.
    ///
    /// Answers every deferred peer and returns to `NotWanting`.
    ///
    /// # Errors
    ///
    /// Returns `NotHoldingSection` unless the section is held.
    pub fn release(&mut self) -> Result<Vec<Action>, EngineError> {
        if self.state != MutexState::InSection {
            return Err(EngineError::NotHoldingSection { state: self.state });
        }

        let mut actions = Vec::new();
        for peer in 0..self.n {
            if self.deferred[peer] {
                self.deferred[peer] = false;
                actions.push(Action::Send {
                    to: peer,
                    message: Message::Permission { from: self.id },
                });
            }
        }
        self.state = MutexState::NotWanting;
        Ok(actions)
    }

    /// Handle SNAPSHOT from the application.
    ///
    /// Starts a round if none is active; otherwise counts toward the
    /// active round, exactly as a peer marker would.
    pub fn begin_snapshot(&mut self) -> Vec<Action> {
        self.handle_marker(false)
    }

    /// Handle a message delivered by the link transport.
    ///
    /// # Errors
    ///
    /// Message-level errors (`PeerOutOfRange`, `UnexpectedPermission`)
    /// leave local state untouched; the driver logs and drops them.
    pub fn deliver(&mut self, message: Message) -> Result<Vec<Action>, EngineError> {
        let from = message.sender();
        if from >= self.n || from == self.id {
            return Err(EngineError::PeerOutOfRange { from, n: self.n });
        }

        match message {
            Message::EntryRequest { from, timestamp } => {
                Ok(self.handle_entry_request(from, timestamp))
            },
            Message::Permission { from } => self.handle_permission(from),
            Message::SnapshotMarker { .. } => Ok(self.handle_marker(true)),
        }
    }

    /// A peer requests the section: the core ordering decision.
    ///
    /// Grant immediately when idle, or when the incoming request is
    /// earlier than ours in the `(timestamp, id)` order; defer otherwise
    /// (holding the section, or wanting it with priority). The Lamport
    /// merge applies on both branches.
    fn handle_entry_request(&mut self, from: ProcessId, timestamp: u64) -> Vec<Action> {
        let theirs_first = (timestamp, from) < (self.request_ts, self.id);
        let grant_now = match self.state {
            MutexState::NotWanting => true,
            MutexState::Wanting => theirs_first,
            MutexState::InSection => false,
        };

        self.clock = self.clock.max(timestamp);

        if grant_now {
            vec![Action::Send { to: from, message: Message::Permission { from: self.id } }]
        } else {
            self.deferred[from] = true;
            Vec::new()
        }
    }

    /// A peer granted our outstanding request.
    fn handle_permission(&mut self, from: ProcessId) -> Result<Vec<Action>, EngineError> {
        if self.state != MutexState::Wanting {
            return Err(EngineError::UnexpectedPermission { from, state: self.state });
        }

        self.pending_replies += 1;
        if self.pending_replies == self.quorum() {
            self.state = MutexState::InSection;
            return Ok(vec![Action::Grant]);
        }
        Ok(Vec::new())
    }

    /// Snapshot trigger, local (`remote = false`) or from a peer marker.
    fn handle_marker(&mut self, remote: bool) -> Vec<Action> {
        if self.snapshot.is_active() {
            return self
                .snapshot
                .note_answer(self.quorum())
                .map(Action::Record)
                .into_iter()
                .collect();
        }

        // Capture before anything else mutates; the record must reflect
        // the instant the round reached this process.
        let record = self.capture_record();
        let mut actions = self.broadcast(Message::SnapshotMarker { from: self.id });
        if let Some(done) = self.snapshot.begin(record, remote, self.quorum()) {
            actions.push(Action::Record(done));
        }
        actions
    }

    /// Serialize the local state for the snapshot round being started.
    ///
    /// Channel contents are not recorded, so the in-transit list is
    /// empty; the round id is stamped when the round begins.
    fn capture_record(&self) -> ProcessRecord {
        ProcessRecord {
            round: self.snapshot.round_id(),
            state: self.state,
            deferred: self.deferred.clone(),
            clock: self.clock,
            request_ts: self.request_ts,
            pending_replies: self.pending_replies,
            in_transit: Vec::new(),
        }
    }

    /// One `Send` per peer, in id order.
    fn broadcast(&self, message: Message) -> Vec<Action> {
        (0..self.n)
            .filter(|&peer| peer != self.id)
            .map(|peer| Action::Send { to: peer, message: message.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(id: ProcessId, n: usize) -> Engine {
        Engine::new(id, n).unwrap()
    }

    fn sends_to(actions: &[Action]) -> Vec<ProcessId> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Send { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn construction_validates_membership() {
        assert!(Engine::new(0, 1).is_err());
        assert!(Engine::new(3, 3).is_err());
        assert!(Engine::new(2, 3).is_ok());
    }

    #[test]
    fn entry_request_broadcasts_and_stamps() {
        let mut p0 = engine(0, 3);
        let actions = p0.request_entry().unwrap();

        assert_eq!(p0.state(), MutexState::Wanting);
        assert_eq!(p0.clock(), 1);
        assert_eq!(p0.request_timestamp(), 1);
        assert_eq!(p0.pending_replies(), 0);
        assert_eq!(sends_to(&actions), vec![1, 2]);
        for action in &actions {
            assert!(matches!(
                action,
                Action::Send { message: Message::EntryRequest { from: 0, timestamp: 1 }, .. }
            ));
        }
    }

    #[test]
    fn quorum_of_permissions_grants_exactly_once() {
        // Scenario: three idle processes, P0 requests, both peers grant.
        let mut p0 = engine(0, 3);
        p0.request_entry().unwrap();

        let actions = p0.deliver(Message::Permission { from: 1 }).unwrap();
        assert!(actions.is_empty());
        assert_eq!(p0.state(), MutexState::Wanting);

        let actions = p0.deliver(Message::Permission { from: 2 }).unwrap();
        assert_eq!(actions, vec![Action::Grant]);
        assert_eq!(p0.state(), MutexState::InSection);
    }

    #[test]
    fn idle_process_grants_immediately() {
        let mut p1 = engine(1, 3);
        let actions = p1.deliver(Message::EntryRequest { from: 0, timestamp: 1 }).unwrap();

        assert_eq!(
            actions,
            vec![Action::Send { to: 0, message: Message::Permission { from: 1 } }]
        );
        assert_eq!(p1.clock(), 1, "Lamport merge applies on the granting path");
        assert!(!p1.deferred()[0]);
    }

    #[test]
    fn holder_defers_requests_until_release() {
        let mut p0 = engine(0, 2);
        p0.request_entry().unwrap();
        p0.deliver(Message::Permission { from: 1 }).unwrap();
        assert_eq!(p0.state(), MutexState::InSection);

        let actions = p0.deliver(Message::EntryRequest { from: 1, timestamp: 5 }).unwrap();
        assert!(actions.is_empty());
        assert!(p0.deferred()[1]);
        assert_eq!(p0.clock(), 5);

        let actions = p0.release().unwrap();
        assert_eq!(
            actions,
            vec![Action::Send { to: 1, message: Message::Permission { from: 0 } }]
        );
        assert_eq!(p0.state(), MutexState::NotWanting);
        assert!(!p0.deferred()[1]);
    }

    #[test]
    fn concurrent_requests_tie_break_on_id() {
        // Scenario: P0 and P1 both request at logical time 1. The
        // smaller id wins the tie, so P0 defers P1 and P1 grants P0.
        let mut p0 = engine(0, 2);
        let mut p1 = engine(1, 2);
        p0.request_entry().unwrap();
        p1.request_entry().unwrap();

        let at_p0 = p0.deliver(Message::EntryRequest { from: 1, timestamp: 1 }).unwrap();
        assert!(at_p0.is_empty(), "P0 has priority and defers P1");
        assert!(p0.deferred()[1]);

        let at_p1 = p1.deliver(Message::EntryRequest { from: 0, timestamp: 1 }).unwrap();
        assert_eq!(
            at_p1,
            vec![Action::Send { to: 0, message: Message::Permission { from: 1 } }],
            "P1 loses the tie and grants immediately"
        );

        let granted = p0.deliver(Message::Permission { from: 1 }).unwrap();
        assert_eq!(granted, vec![Action::Grant]);
        assert_eq!(p0.state(), MutexState::InSection);
        assert_eq!(p1.state(), MutexState::Wanting);

        // Only on P0's exit does P1 receive the deferred permission.
        let on_exit = p0.release().unwrap();
        assert_eq!(
            on_exit,
            vec![Action::Send { to: 1, message: Message::Permission { from: 0 } }]
        );
        let granted = p1.deliver(Message::Permission { from: 0 }).unwrap();
        assert_eq!(granted, vec![Action::Grant]);
        assert_eq!(p1.state(), MutexState::InSection);
    }

    #[test]
    fn earlier_timestamp_wins_over_waiting_process() {
        let mut p1 = engine(1, 3);
        // Push P1's clock up before it requests, so its request is late.
        p1.deliver(Message::EntryRequest { from: 2, timestamp: 4 }).unwrap();
        p1.request_entry().unwrap();
        assert_eq!(p1.request_timestamp(), 5);

        // A request stamped earlier than ours gets granted immediately.
        let actions = p1.deliver(Message::EntryRequest { from: 0, timestamp: 2 }).unwrap();
        assert_eq!(
            actions,
            vec![Action::Send { to: 0, message: Message::Permission { from: 1 } }]
        );

        // A request stamped later gets deferred.
        let actions = p1.deliver(Message::EntryRequest { from: 2, timestamp: 9 }).unwrap();
        assert!(actions.is_empty());
        assert!(p1.deferred()[2]);
        assert_eq!(p1.clock(), 9);
    }

    #[test]
    fn clock_never_decreases_on_stale_timestamps() {
        let mut p0 = engine(0, 3);
        p0.deliver(Message::EntryRequest { from: 1, timestamp: 10 }).unwrap();
        assert_eq!(p0.clock(), 10);
        p0.deliver(Message::EntryRequest { from: 2, timestamp: 3 }).unwrap();
        assert_eq!(p0.clock(), 10);
    }

    #[test]
    fn command_misuse_is_rejected_without_corrupting_state() {
        let mut p0 = engine(0, 2);

        assert_eq!(
            p0.release(),
            Err(EngineError::NotHoldingSection { state: MutexState::NotWanting })
        );

        p0.request_entry().unwrap();
        assert_eq!(
            p0.request_entry(),
            Err(EngineError::AlreadyRequested { state: MutexState::Wanting })
        );
        assert_eq!(p0.state(), MutexState::Wanting);
        assert_eq!(p0.request_timestamp(), 1, "failed ENTER must not restamp");
    }

    #[test]
    fn unexpected_permission_is_rejected() {
        let mut p0 = engine(0, 3);
        assert_eq!(
            p0.deliver(Message::Permission { from: 1 }),
            Err(EngineError::UnexpectedPermission { from: 1, state: MutexState::NotWanting })
        );
        assert_eq!(p0.pending_replies(), 0);
    }

    #[test]
    fn senders_outside_the_membership_are_rejected() {
        let mut p0 = engine(0, 3);
        assert_eq!(
            p0.deliver(Message::Permission { from: 7 }),
            Err(EngineError::PeerOutOfRange { from: 7, n: 3 })
        );
        assert_eq!(
            p0.deliver(Message::EntryRequest { from: 0, timestamp: 1 }),
            Err(EngineError::PeerOutOfRange { from: 0, n: 3 })
        );
    }

    #[test]
    fn local_snapshot_captures_and_propagates() {
        // Scenario: P0 starts a round; its two peers' markers complete it.
        let mut p0 = engine(0, 3);
        let actions = p0.begin_snapshot();
        assert_eq!(sends_to(&actions), vec![1, 2]);
        assert!(p0.snapshot_active());

        assert!(p0.deliver(Message::SnapshotMarker { from: 1 }).unwrap().is_empty());
        let done = p0.deliver(Message::SnapshotMarker { from: 2 }).unwrap();
        let Some(Action::Record(record)) = done.first() else {
            unreachable!("round must complete with a record");
        };
        assert_eq!(record.round, 1);
        assert_eq!(record.state, MutexState::NotWanting);
        assert_eq!(record.deferred, vec![false, false, false]);
        assert!(record.in_transit.is_empty());
        assert!(!p0.snapshot_active());
    }

    #[test]
    fn remote_marker_starts_a_round_and_rebroadcasts() {
        let mut p1 = engine(1, 3);
        let actions = p1.deliver(Message::SnapshotMarker { from: 0 }).unwrap();
        assert_eq!(sends_to(&actions), vec![0, 2]);
        assert!(p1.snapshot_active());

        // The triggering marker already counted, so one more completes.
        let done = p1.deliver(Message::SnapshotMarker { from: 2 }).unwrap();
        assert!(matches!(done.first(), Some(Action::Record(_))));
    }

    #[test]
    fn snapshot_rounds_do_not_overlap() {
        let mut p0 = engine(0, 3);
        p0.begin_snapshot();

        // A second local trigger mid-round only advances the counter.
        let actions = p0.begin_snapshot();
        assert!(sends_to(&actions).is_empty());
        assert!(p0.snapshot_active());

        let done = p0.deliver(Message::SnapshotMarker { from: 1 }).unwrap();
        assert!(matches!(done.first(), Some(Action::Record(_))));
    }

    #[test]
    fn snapshot_record_reflects_protocol_state() {
        let mut p0 = engine(0, 3);
        p0.request_entry().unwrap();
        p0.deliver(Message::Permission { from: 1 }).unwrap();
        p0.deliver(Message::EntryRequest { from: 2, timestamp: 8 }).unwrap();

        p0.begin_snapshot();
        p0.deliver(Message::SnapshotMarker { from: 1 }).unwrap();
        let done = p0.deliver(Message::SnapshotMarker { from: 2 }).unwrap();
        let Some(Action::Record(record)) = done.first() else {
            unreachable!("round must complete with a record");
        };

        assert_eq!(record.state, MutexState::Wanting);
        assert_eq!(record.clock, 8);
        assert_eq!(record.request_ts, 1);
        assert_eq!(record.pending_replies, 1);
        assert_eq!(record.deferred, vec![false, false, true]);
        assert_eq!(record.to_line(), "1 wantMX 001 8 1 1");
    }

    #[test]
    fn consecutive_sections_reuse_the_engine() {
        let mut p0 = engine(0, 2);
        for expected_ts in [1, 2, 3] {
            p0.request_entry().unwrap();
            assert_eq!(p0.request_timestamp(), expected_ts);
            p0.deliver(Message::Permission { from: 1 }).unwrap();
            assert_eq!(p0.state(), MutexState::InSection);
            p0.release().unwrap();
            assert_eq!(p0.state(), MutexState::NotWanting);
        }
    }

    mod properties {
        use proptest::prelude::{prop, prop_assert, prop_assert_eq, proptest};

        use super::*;

        proptest! {
            // An idle engine exposed to arbitrary peer traffic must stay
            // idle, keep a monotone clock, and never grant a section it
            // never asked for.
            #[test]
            fn arbitrary_peer_traffic_never_corrupts_an_idle_engine(
                events in prop::collection::vec((1..3usize, 0..3u8, 1..20u64), 0..64)
            ) {
                let mut p0 = engine(0, 3);
                let mut floor = 0;
                for (from, kind, timestamp) in events {
                    let message = match kind {
                        0 => Message::EntryRequest { from, timestamp },
                        1 => Message::Permission { from },
                        _ => Message::SnapshotMarker { from },
                    };
                    let _ = p0.deliver(message);
                    prop_assert!(p0.clock() >= floor);
                    floor = p0.clock();
                    prop_assert!(p0.state() != MutexState::InSection);
                    prop_assert_eq!(p0.pending_replies(), 0);
                }
            }
        }
    }
}
