//! Snapshot record lines.
//!
//! One record is a point-in-time serialization of a single process's
//! mutual-exclusion state, written as one whitespace-delimited line:
//!
//! ```text
//! <roundId> <stateName> <waitingBitstring> <clock> <requestTimestamp> <pendingReplies> [msg;;msg...]
//! ```
//!
//! The trailing descriptors list messages in transit when the snapshot
//! was captured. The engine currently records no channel state, so the
//! list is empty in practice, but the format (and the parser) keeps the
//! field so that captured files stay forward-compatible with a full
//! channel-recording protocol.

use std::fmt;

use crate::errors::ProtocolError;

/// Sub-delimiter between in-transit message descriptors.
pub const IN_TRANSIT_DELIMITER: &str = ";;";

/// Mutual-exclusion state of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    /// The process does not want the critical section.
    NotWanting,
    /// The process has broadcast an entry request and is collecting
    /// permissions.
    Wanting,
    /// The process is inside the critical section.
    InSection,
}

impl MutexState {
    /// Name used in snapshot record lines.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::NotWanting => "noMX",
            Self::Wanting => "wantMX",
            Self::InSection => "inMX",
        }
    }

    /// Decode a state name from a snapshot record line.
    pub fn from_wire(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "noMX" => Ok(Self::NotWanting),
            "wantMX" => Ok(Self::Wanting),
            "inMX" => Ok(Self::InSection),
            other => Err(ProtocolError::UnknownState(other.to_owned())),
        }
    }
}

impl fmt::Display for MutexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One process's captured state for one snapshot round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Snapshot round this record belongs to.
    pub round: u64,
    /// Mutual-exclusion state at capture time.
    pub state: MutexState,
    /// Deferred-reply flags, indexed by peer id (`true` = owed a reply).
    pub deferred: Vec<bool>,
    /// Lamport clock at capture time.
    pub clock: u64,
    /// Timestamp of the current/last entry request. Only meaningful
    /// while `state` is `wantMX` or `inMX`.
    pub request_ts: u64,
    /// Permissions received for the current request.
    pub pending_replies: usize,
    /// Descriptors of messages in transit at capture time.
    pub in_transit: Vec<String>,
}

impl ProcessRecord {
    /// Serialize this record as one snapshot file line (no newline).
    pub fn to_line(&self) -> String {
        let bits: String =
            self.deferred.iter().map(|&flag| if flag { '1' } else { '0' }).collect();
        let mut line = format!(
            "{} {} {} {} {} {}",
            self.round, self.state, bits, self.clock, self.request_ts, self.pending_replies
        );
        if !self.in_transit.is_empty() {
            line.push(' ');
            line.push_str(&self.in_transit.join(IN_TRANSIT_DELIMITER));
        }
        line
    }

    /// Parse one snapshot file line.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the line has fewer than six
    /// fields, names an unknown state, carries a malformed bitstring, or
    /// holds a non-numeric counter.
    pub fn parse_line(line: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(ProtocolError::ShortRecord(fields.len()));
        }

        let round = parse_counter("roundId", fields[0])?;
        let state = MutexState::from_wire(fields[1])?;
        let deferred = parse_bitstring(fields[2])?;
        let clock = parse_counter("clock", fields[3])?;
        let request_ts = parse_counter("requestTimestamp", fields[4])?;
        let pending_replies = parse_counter("pendingReplies", fields[5])?;

        // Descriptors may themselves contain spaces, so rejoin the tail
        // before splitting on the sub-delimiter.
        let in_transit = if fields.len() > 6 {
            fields[6..]
                .join(" ")
                .split(IN_TRANSIT_DELIMITER)
                .map(str::trim)
                .filter(|descriptor| !descriptor.is_empty())
                .map(str::to_owned)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self { round, state, deferred, clock, request_ts, pending_replies, in_transit })
    }
}

fn parse_counter<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ProtocolError> {
    value
        .parse()
        .map_err(|_| ProtocolError::InvalidInteger { field, value: value.to_owned() })
}

fn parse_bitstring(bits: &str) -> Result<Vec<bool>, ProtocolError> {
    bits.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(ProtocolError::BadWaitingFlag(other)),
        })
        .collect()
}
