//! Parse errors for wire messages and snapshot record lines.
//!
//! All of these are non-fatal: a node that receives a malformed payload
//! logs it and drops it, because crashing would stall every peer that is
//! waiting on one of our replies.

use thiserror::Error;

/// Errors produced while decoding wire messages or snapshot records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The payload was empty or contained only whitespace.
    #[error("empty payload")]
    Empty,

    /// The leading verb did not name a known message type.
    #[error("unknown message verb `{0}`")]
    UnknownVerb(String),

    /// A message had the wrong number of comma-delimited fields.
    #[error("`{verb}` expects {expected} fields, got {actual}")]
    FieldCount {
        /// Message verb being decoded.
        verb: &'static str,
        /// Number of fields the verb requires.
        expected: usize,
        /// Number of fields actually present.
        actual: usize,
    },

    /// A numeric field did not parse as an integer.
    #[error("field `{field}` is not a valid integer: `{value}`")]
    InvalidInteger {
        /// Name of the offending field.
        field: &'static str,
        /// Raw text that failed to parse.
        value: String,
    },

    /// A snapshot record line had fewer than the six mandatory fields.
    #[error("snapshot record has {0} fields, expected at least 6")]
    ShortRecord(usize),

    /// A snapshot record named a state outside `noMX`/`wantMX`/`inMX`.
    #[error("unknown state name `{0}`")]
    UnknownState(String),

    /// The waiting bitstring contained a character other than `0`/`1`.
    #[error("waiting bitstring contains `{0}`, expected only 0 or 1")]
    BadWaitingFlag(char),
}
