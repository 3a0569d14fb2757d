//! Module that contains all the different message types sent in the network.
//!
//! Every message is a single line of space separated tokens whose first two fields are always the
//! sender's logical time and id:
//!
//! ```text
//! REQUEST <time> <id>
//! REPLY <time> <id>
//! TAKE_SNAPSHOT <time> <id> <snapshotID> [<initiatorID>]
//! SNAPSHOT_DATA <time> <id> <snapshotID> <base64-json>
//! ```

use crate::{error::MessageError, ProcessId, SnapshotId, Timestamp};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::{fmt, str::FromStr};

pub const REQUEST: &str = "REQUEST";
pub const REPLY: &str = "REPLY";
pub const TAKE_SNAPSHOT: &str = "TAKE_SNAPSHOT";
pub const SNAPSHOT_DATA: &str = "SNAPSHOT_DATA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request {
        time: Timestamp,
        sender: ProcessId,
    },
    Reply {
        time: Timestamp,
        sender: ProcessId,
    },
    /// Chandy-Lamport marker.
    TakeSnapshot {
        time: Timestamp,
        sender: ProcessId,
        snapshot_id: SnapshotId,
        initiator: Option<ProcessId>,
    },
    /// A peer's local and channel record, sent to the initiator. `payload` stays base64 encoded.
    SnapshotData {
        time: Timestamp,
        sender: ProcessId,
        snapshot_id: SnapshotId,
        payload: String,
    },
}

impl Message {
    pub fn time(&self) -> Timestamp {
        match self {
            Self::Request { time, .. }
            | Self::Reply { time, .. }
            | Self::TakeSnapshot { time, .. }
            | Self::SnapshotData { time, .. } => *time,
        }
    }

    pub fn sender(&self) -> ProcessId {
        match self {
            Self::Request { sender, .. }
            | Self::Reply { sender, .. }
            | Self::TakeSnapshot { sender, .. }
            | Self::SnapshotData { sender, .. } => *sender,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => REQUEST,
            Self::Reply { .. } => REPLY,
            Self::TakeSnapshot { .. } => TAKE_SNAPSHOT,
            Self::SnapshotData { .. } => SNAPSHOT_DATA,
        }
    }

    /// Function that tells if the message belongs to the mutual exclusion protocol, which is the
    /// traffic a snapshot records as in transit.
    pub fn is_channel_traffic(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Reply { .. })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { time, sender } => write!(f, "{REQUEST} {time} {sender}"),
            Self::Reply { time, sender } => write!(f, "{REPLY} {time} {sender}"),
            Self::TakeSnapshot {
                time,
                sender,
                snapshot_id,
                initiator: Some(initiator),
            } => write!(f, "{TAKE_SNAPSHOT} {time} {sender} {snapshot_id} {initiator}"),
            Self::TakeSnapshot {
                time,
                sender,
                snapshot_id,
                initiator: None,
            } => write!(f, "{TAKE_SNAPSHOT} {time} {sender} {snapshot_id}"),
            Self::SnapshotData {
                time,
                sender,
                snapshot_id,
                payload,
            } => write!(f, "{SNAPSHOT_DATA} {time} {sender} {snapshot_id} {payload}"),
        }
    }
}

impl FromStr for Message {
    type Err = MessageError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let kind = *tokens.first().ok_or(MessageError::Empty)?;

        let (kind, expected) = match kind {
            REQUEST => (REQUEST, "3"),
            REPLY => (REPLY, "3"),
            TAKE_SNAPSHOT => (TAKE_SNAPSHOT, "4 or 5"),
            SNAPSHOT_DATA => (SNAPSHOT_DATA, "5"),
            other => return Err(MessageError::UnknownKind(other.to_string())),
        };

        let count_ok = match kind {
            TAKE_SNAPSHOT => tokens.len() == 4 || tokens.len() == 5,
            SNAPSHOT_DATA => tokens.len() == 5,
            _ => tokens.len() == 3,
        };
        if !count_ok {
            return Err(MessageError::FieldCount {
                kind,
                expected,
                actual: tokens.len(),
            });
        }

        let time: Timestamp = number(tokens[1], "time")?;
        if time == Timestamp::MAX {
            return Err(MessageError::TimeOutOfRange(time));
        }
        let sender = number(tokens[2], "id")?;

        Ok(match kind {
            REQUEST => Self::Request { time, sender },
            REPLY => Self::Reply { time, sender },
            TAKE_SNAPSHOT => Self::TakeSnapshot {
                time,
                sender,
                snapshot_id: number(tokens[3], "snapshotID")?,
                initiator: tokens
                    .get(4)
                    .map(|token| number(token, "initiatorID"))
                    .transpose()?,
            },
            _ => Self::SnapshotData {
                time,
                sender,
                snapshot_id: number(tokens[3], "snapshotID")?,
                payload: tokens[4].to_string(),
            },
        })
    }
}

fn number<T: FromStr>(token: &str, field: &'static str) -> Result<T, MessageError> {
    token.parse().map_err(|_| MessageError::NotANumber {
        field,
        value: token.to_string(),
    })
}

/// Function that wraps a JSON document into the single token carried by `SNAPSHOT_DATA`.
pub fn encode_payload(json: &str) -> String {
    STANDARD.encode(json.as_bytes())
}

/// Function that unwraps a `SNAPSHOT_DATA` token back into the JSON document it carries.
pub fn decode_payload(payload: &str) -> Result<String, MessageError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| MessageError::Payload(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| MessageError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_time_the_clock_cannot_pass() {
        assert_eq!(
            format!("REPLY {} 2", Timestamp::MAX).parse::<Message>(),
            Err(MessageError::TimeOutOfRange(Timestamp::MAX))
        );
        assert!(format!("REQUEST {} 2", Timestamp::MAX - 1)
            .parse::<Message>()
            .is_ok());
    }

    #[test]
    fn parses_request_and_reply() {
        assert_eq!(
            "REQUEST 4 2".parse::<Message>(),
            Ok(Message::Request { time: 4, sender: 2 })
        );
        assert_eq!(
            "REPLY 9 1".parse::<Message>(),
            Ok(Message::Reply { time: 9, sender: 1 })
        );
    }

    #[test]
    fn parses_marker_with_and_without_initiator() {
        assert_eq!(
            "TAKE_SNAPSHOT 3 2 7".parse::<Message>(),
            Ok(Message::TakeSnapshot {
                time: 3,
                sender: 2,
                snapshot_id: 7,
                initiator: None
            })
        );
        assert_eq!(
            "TAKE_SNAPSHOT 3 2 7 1".parse::<Message>(),
            Ok(Message::TakeSnapshot {
                time: 3,
                sender: 2,
                snapshot_id: 7,
                initiator: Some(1)
            })
        );
    }

    #[test]
    fn display_matches_wire_format() {
        let marker = Message::TakeSnapshot {
            time: 5,
            sender: 1,
            snapshot_id: 2,
            initiator: Some(1),
        };
        assert_eq!(marker.to_string(), "TAKE_SNAPSHOT 5 1 2 1");
        assert_eq!(
            Message::Request { time: 1, sender: 3 }.to_string(),
            "REQUEST 1 3"
        );

        let data = Message::SnapshotData {
            time: 8,
            sender: 2,
            snapshot_id: 1,
            payload: encode_payload("{}"),
        };
        assert_eq!(data.to_string().parse::<Message>(), Ok(data));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!("".parse::<Message>(), Err(MessageError::Empty));
        assert!(matches!(
            "REQUEST 1".parse::<Message>(),
            Err(MessageError::FieldCount { actual: 2, .. })
        ));
        assert!(matches!(
            "REPLY x 1".parse::<Message>(),
            Err(MessageError::NotANumber { field: "time", .. })
        ));
        assert!(matches!(
            "SNAPSHOT_DATA 1 2 3".parse::<Message>(),
            Err(MessageError::FieldCount { .. })
        ));
        assert!(matches!(
            "RELEASE 1 2".parse::<Message>(),
            Err(MessageError::UnknownKind(kind)) if kind == "RELEASE"
        ));
    }

    #[test]
    fn payload_codec() {
        let json = r#"{"time":3,"isInCriticalSection":false}"#;
        let encoded = encode_payload(json);
        assert!(!encoded.contains(' '));
        assert_eq!(decode_payload(&encoded).unwrap(), json);
        assert!(decode_payload("not base64!").is_err());
    }
}
