//! Deterministic simulation world for the Exclave protocol.
//!
//! Runs N pure engines against an explicit in-flight message multiset,
//! so a test chooses exactly which message is delivered next — any
//! interleaving the real network could produce can be replayed here,
//! either directed (scenario tests) or driven by a seeded RNG
//! (property tests).
//!
//! Because the harness holds the channel state the engines cannot see,
//! its invariant oracle verifies full reply accounting: replies
//! received, replies and requests still in flight, and deferred flags
//! held by peers must add up to the quorum for every wanting process.
//! The file-based audit tool can only check the process-local subset.

use exclave_core::{Action, Engine, EngineError};
use exclave_proto::{Message, MutexState, ProcessId, ProcessRecord};
use rand::Rng;
use tracing::debug;

/// One message sitting in the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Destination process.
    pub to: ProcessId,
    /// The message itself (the sender is in the payload).
    pub message: Message,
}

/// N engines plus the network between them.
pub struct SimWorld {
    engines: Vec<Engine>,
    in_flight: Vec<InFlight>,
    grants: Vec<usize>,
    records: Vec<Vec<ProcessRecord>>,
    clock_floor: Vec<u64>,
}

impl SimWorld {
    /// A world of `n` idle processes with an empty network.
    ///
    /// # Errors
    ///
    /// Fails for memberships the engine rejects (`n < 2`).
    pub fn new(n: usize) -> Result<Self, EngineError> {
        let engines =
            (0..n).map(|id| Engine::new(id, n)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            engines,
            in_flight: Vec::new(),
            grants: vec![0; n],
            records: vec![Vec::new(); n],
            clock_floor: vec![0; n],
        })
    }

    /// Number of processes.
    pub fn n(&self) -> usize {
        self.engines.len()
    }

    /// Read access to one engine, for oracle assertions.
    pub fn engine(&self, p: ProcessId) -> &Engine {
        &self.engines[p]
    }

    /// Messages currently in flight, in send order.
    pub fn in_flight(&self) -> &[InFlight] {
        &self.in_flight
    }

    /// Grants observed by process `p` so far.
    pub fn grants(&self, p: ProcessId) -> usize {
        self.grants[p]
    }

    /// Snapshot records completed by process `p` so far.
    pub fn records(&self, p: ProcessId) -> &[ProcessRecord] {
        &self.records[p]
    }

    /// Process `p` issues ENTER.
    ///
    /// # Errors
    ///
    /// Propagates `AlreadyRequested` on misuse.
    pub fn enter(&mut self, p: ProcessId) -> Result<(), EngineError> {
        let actions = self.engines[p].request_entry()?;
        self.apply(p, actions);
        Ok(())
    }

    /// Process `p` issues EXIT.
    ///
    /// # Errors
    ///
    /// Propagates `NotHoldingSection` on misuse.
    pub fn exit(&mut self, p: ProcessId) -> Result<(), EngineError> {
        let actions = self.engines[p].release()?;
        self.apply(p, actions);
        Ok(())
    }

    /// Process `p` issues SNAPSHOT.
    pub fn snapshot(&mut self, p: ProcessId) {
        let actions = self.engines[p].begin_snapshot();
        self.apply(p, actions);
    }

    /// Deliver the in-flight message at `index`.
    ///
    /// # Errors
    ///
    /// Propagates engine rejections; in a well-formed run none occur,
    /// so a property test treats an error as a failure.
    pub fn deliver(&mut self, index: usize) -> Result<(), EngineError> {
        let InFlight { to, message } = self.in_flight.remove(index);
        debug!(to, ?message, "delivering");
        let actions = self.engines[to].deliver(message)?;
        self.apply(to, actions);
        Ok(())
    }

    /// Deliver the oldest in-flight message addressed to `to`, if any.
    ///
    /// # Errors
    ///
    /// Propagates engine rejections.
    pub fn deliver_to(&mut self, to: ProcessId) -> Result<bool, EngineError> {
        match self.in_flight.iter().position(|m| m.to == to) {
            Some(index) => {
                self.deliver(index)?;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Deliver everything, in an order chosen by `rng`, until the
    /// network is empty.
    ///
    /// Processes left `Wanting` stay wanting: their grant depends on a
    /// peer exiting, which the caller controls.
    ///
    /// # Errors
    ///
    /// Propagates engine rejections.
    pub fn settle<R: Rng>(&mut self, rng: &mut R) -> Result<(), EngineError> {
        while !self.in_flight.is_empty() {
            let index = rng.gen_range(0..self.in_flight.len());
            self.deliver(index)?;
        }
        Ok(())
    }

    fn apply(&mut self, p: ProcessId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    self.in_flight.push(InFlight { to, message });
                },
                Action::Grant => self.grants[p] += 1,
                Action::Record(record) => self.records[p].push(record),
            }
        }
    }

    /// Check every protocol invariant against the current global state.
    ///
    /// Returns human-readable descriptions of all violations; an empty
    /// vector means the cut is consistent. Also advances the clock
    /// floor used for the monotonicity check.
    pub fn check_invariants(&mut self) -> Vec<String> {
        let mut violations = Vec::new();
        let n = self.n();

        // At most one process in the section.
        let holders: Vec<ProcessId> = (0..n)
            .filter(|&p| self.engines[p].state() == MutexState::InSection)
            .collect();
        if holders.len() > 1 {
            violations.push(format!("multiple processes in section: {holders:?}"));
        }

        // A fully idle system holds nothing and has no protocol
        // message in transit (snapshot markers are audit traffic, not
        // protocol traffic).
        let all_idle =
            (0..n).all(|p| self.engines[p].state() == MutexState::NotWanting);
        if all_idle {
            for p in 0..n {
                if self.engines[p].deferred().iter().any(|&flag| flag) {
                    violations.push(format!("process {p} defers while all idle"));
                }
            }
            let protocol_in_flight = self
                .in_flight
                .iter()
                .any(|m| !matches!(m.message, Message::SnapshotMarker { .. }));
            if protocol_in_flight {
                violations.push("protocol messages in flight while all idle".to_owned());
            }
        }

        // A deferred flag implies its holder wants or holds the section.
        for p in 0..n {
            if self.engines[p].state() == MutexState::NotWanting
                && self.engines[p].deferred().iter().any(|&flag| flag)
            {
                violations.push(format!("process {p} defers while idle"));
            }
        }

        // Exact reply accounting for every wanting process.
        for p in 0..n {
            if self.engines[p].state() != MutexState::Wanting {
                continue;
            }
            let received = self.engines[p].pending_replies();
            let replies_in_flight = self
                .in_flight
                .iter()
                .filter(|m| m.to == p && matches!(m.message, Message::Permission { .. }))
                .count();
            let requests_in_flight = self
                .in_flight
                .iter()
                .filter(|m| {
                    matches!(m.message, Message::EntryRequest { from, .. } if from == p)
                })
                .count();
            let deferred_by_peers =
                (0..n).filter(|&q| self.engines[q].deferred()[p]).count();

            let accounted =
                received + replies_in_flight + requests_in_flight + deferred_by_peers;
            if accounted != n - 1 {
                violations.push(format!(
                    "process {p} accounts for {accounted} of {} replies \
                     (received {received}, in flight {replies_in_flight}, \
                     pending requests {requests_in_flight}, deferred {deferred_by_peers})",
                    n - 1
                ));
            }
        }

        // Timestamp sanity and clock monotonicity.
        for p in 0..n {
            let engine = &self.engines[p];
            if engine.state() != MutexState::NotWanting && engine.request_timestamp() == 0 {
                violations.push(format!("process {p} active without request timestamp"));
            }
            if engine.request_timestamp() > engine.clock() {
                violations.push(format!(
                    "process {p} request timestamp {} ahead of clock {}",
                    engine.request_timestamp(),
                    engine.clock()
                ));
            }
            if engine.clock() < self.clock_floor[p] {
                violations.push(format!(
                    "process {p} clock went backwards: {} < {}",
                    engine.clock(),
                    self.clock_floor[p]
                ));
            }
            self.clock_floor[p] = self.clock_floor[p].max(engine.clock());
        }

        violations
    }
}
