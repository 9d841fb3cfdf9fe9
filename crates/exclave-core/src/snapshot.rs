//! Snapshot round bookkeeping.
//!
//! A best-effort, Chandy-Lamport-flavored recording protocol layered on
//! the normal message stream. A round is started either by the local
//! application or by a peer's marker; either way the local state is
//! captured immediately and a marker is re-broadcast so the round
//! reaches every process. The round completes once `N-1` markers have
//! been counted.
//!
//! One round may be active at a time per process. Markers arriving while
//! a round is active only advance the counter; they never start a second
//! round. Channel contents are not recorded, so captured records carry an
//! empty in-transit list.

use exclave_proto::ProcessRecord;

/// Per-process bookkeeping for the snapshot protocol.
///
/// Owned by the engine; pure state, no I/O.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRound {
    captured: Option<ProcessRecord>,
    answers: usize,
    next_round: u64,
}

impl SnapshotRound {
    /// Fresh bookkeeping: no round active, round ids start at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a round is currently in progress.
    pub fn is_active(&self) -> bool {
        self.captured.is_some()
    }

    /// Id of the most recently started round (0 before any round).
    pub fn round_id(&self) -> u64 {
        self.next_round
    }

    /// Markers counted so far for the active round.
    pub fn answers(&self) -> usize {
        self.answers
    }

    /// Start a round with the freshly captured `record`, stamping it
    /// with the new round id.
    ///
    /// A remotely triggered round counts the triggering marker as its
    /// first answer. With `N = 2` that already satisfies the quorum, so
    /// the round may complete immediately; the finished record is
    /// returned in that case.
    ///
    /// Must not be called while a round is active; the caller checks
    /// [`Self::is_active`] first.
    pub fn begin(
        &mut self,
        mut record: ProcessRecord,
        remote: bool,
        quorum: usize,
    ) -> Option<ProcessRecord> {
        self.next_round += 1;
        record.round = self.next_round;
        self.answers = usize::from(remote);
        self.captured = Some(record);
        if self.answers == quorum { self.finish() } else { None }
    }

    /// Count one marker for the active round.
    ///
    /// Returns the captured record once the quorum is reached, resetting
    /// the bookkeeping so a new round can start. Returns `None` while
    /// the round is still collecting, or if no round is active.
    pub fn note_answer(&mut self, quorum: usize) -> Option<ProcessRecord> {
        if !self.is_active() {
            return None;
        }
        self.answers += 1;
        if self.answers >= quorum { self.finish() } else { None }
    }

    fn finish(&mut self) -> Option<ProcessRecord> {
        self.answers = 0;
        self.captured.take()
    }
}
