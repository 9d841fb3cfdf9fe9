//! Protocol messages exchanged between processes.
//!
//! Every message is a single comma-delimited text line. The sender id is
//! always carried in the payload rather than derived from the connection,
//! because the transport's notion of "origin" is an address, not a
//! process id, and addresses are not trustworthy for ordering decisions.

use crate::{ProcessId, errors::ProtocolError};

/// Field delimiter for wire messages.
pub const FIELD_DELIMITER: char = ',';

const VERB_ENTRY_REQUEST: &str = "reqEntry";
const VERB_PERMISSION: &str = "respOk";
const VERB_SNAPSHOT_MARKER: &str = "msgSnapshot";

/// A protocol message.
///
/// Wire encodings:
///
/// | Variant | Encoding |
/// |---|---|
/// | [`Message::EntryRequest`] | `reqEntry,<id>,<timestamp>` |
/// | [`Message::Permission`] | `respOk,<id>` |
/// | [`Message::SnapshotMarker`] | `msgSnapshot,<id>` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request to enter the critical section, stamped with the sender's
    /// Lamport clock at request time.
    EntryRequest {
        /// Requesting process.
        from: ProcessId,
        /// Lamport timestamp recorded when the request was issued.
        timestamp: u64,
    },
    /// Permission for the receiver's current entry request.
    Permission {
        /// Granting process.
        from: ProcessId,
    },
    /// Marker propagating a distributed snapshot round.
    SnapshotMarker {
        /// Process forwarding the round.
        from: ProcessId,
    },
}

impl Message {
    /// Encode this message as a wire line (no trailing newline).
    pub fn encode(&self) -> String {
        match self {
            Self::EntryRequest { from, timestamp } => {
                format!("{VERB_ENTRY_REQUEST}{FIELD_DELIMITER}{from}{FIELD_DELIMITER}{timestamp}")
            },
            Self::Permission { from } => {
                format!("{VERB_PERMISSION}{FIELD_DELIMITER}{from}")
            },
            Self::SnapshotMarker { from } => {
                format!("{VERB_SNAPSHOT_MARKER}{FIELD_DELIMITER}{from}")
            },
        }
    }

    /// Decode a wire line.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for an unknown verb, a wrong field
    /// count, or a non-numeric id/timestamp. Callers are expected to log
    /// and drop such payloads rather than abort.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let fields: Vec<&str> = payload.split(FIELD_DELIMITER).collect();
        match fields[0] {
            VERB_ENTRY_REQUEST => {
                expect_fields(VERB_ENTRY_REQUEST, &fields, 3)?;
                Ok(Self::EntryRequest {
                    from: parse_field("senderId", fields[1])?,
                    timestamp: parse_field("senderTimestamp", fields[2])?,
                })
            },
            VERB_PERMISSION => {
                expect_fields(VERB_PERMISSION, &fields, 2)?;
                Ok(Self::Permission { from: parse_field("senderId", fields[1])? })
            },
            VERB_SNAPSHOT_MARKER => {
                expect_fields(VERB_SNAPSHOT_MARKER, &fields, 2)?;
                Ok(Self::SnapshotMarker { from: parse_field("senderId", fields[1])? })
            },
            verb => Err(ProtocolError::UnknownVerb(verb.to_owned())),
        }
    }

    /// Id of the process that sent this message.
    pub fn sender(&self) -> ProcessId {
        match self {
            Self::EntryRequest { from, .. }
            | Self::Permission { from }
            | Self::SnapshotMarker { from } => *from,
        }
    }
}

fn expect_fields(
    verb: &'static str,
    fields: &[&str],
    expected: usize,
) -> Result<(), ProtocolError> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::FieldCount { verb, expected, actual: fields.len() })
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ProtocolError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidInteger { field, value: value.to_owned() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_wire_format() {
        assert_eq!(Message::EntryRequest { from: 0, timestamp: 1 }.encode(), "reqEntry,0,1");
        assert_eq!(Message::Permission { from: 2 }.encode(), "respOk,2");
        assert_eq!(Message::SnapshotMarker { from: 1 }.encode(), "msgSnapshot,1");
    }

    #[test]
    fn parse_entry_request() {
        let msg = Message::parse("reqEntry,3,17").unwrap();
        assert_eq!(msg, Message::EntryRequest { from: 3, timestamp: 17 });
        assert_eq!(msg.sender(), 3);
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        let msg = Message::parse("  respOk,1\n").unwrap();
        assert_eq!(msg, Message::Permission { from: 1 });
    }

    #[test]
    fn parse_rejects_unknown_verb() {
        assert_eq!(
            Message::parse("reqExit,0"),
            Err(ProtocolError::UnknownVerb("reqExit".to_owned()))
        );
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        assert_eq!(
            Message::parse("reqEntry,0"),
            Err(ProtocolError::FieldCount { verb: "reqEntry", expected: 3, actual: 2 })
        );
        assert_eq!(
            Message::parse("respOk,0,9"),
            Err(ProtocolError::FieldCount { verb: "respOk", expected: 2, actual: 3 })
        );
    }

    #[test]
    fn parse_rejects_non_numeric_fields() {
        assert_eq!(
            Message::parse("reqEntry,zero,1"),
            Err(ProtocolError::InvalidInteger { field: "senderId", value: "zero".to_owned() })
        );
        assert_eq!(
            Message::parse("reqEntry,0,one"),
            Err(ProtocolError::InvalidInteger { field: "senderTimestamp", value: "one".to_owned() })
        );
    }

    #[test]
    fn parse_rejects_empty_payload() {
        assert_eq!(Message::parse("   "), Err(ProtocolError::Empty));
    }

    mod properties {
        use proptest::prelude::{any, proptest};

        use super::*;

        proptest! {
            // The parser sits directly behind the network; arbitrary
            // bytes must produce an error, never a panic.
            #[test]
            fn parse_never_panics(payload in any::<String>()) {
                let _ = Message::parse(&payload);
            }

            #[test]
            fn close_but_malformed_lines_are_rejected(id in any::<u64>(), junk in "[a-z]{1,8}") {
                let payload = format!("reqEntry,{id},{junk}");
                let parsed = Message::parse(&payload);
                assert!(parsed.is_err());
            }
        }
    }
}
