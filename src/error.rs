//! Module that contains the error types of the protocol core.

use crate::{mutex::LockState, ProcessId, Timestamp};
use thiserror::Error;

/// Errors produced while parsing a wire line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,

    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    #[error("{kind} expects {expected} fields, got {actual}")]
    FieldCount {
        kind: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("field `{field}` is not a number: `{value}`")]
    NotANumber { field: &'static str, value: String },

    #[error("timestamp {0} leaves no room for the clock to advance")]
    TimeOutOfRange(Timestamp),

    #[error("invalid snapshot payload: {0}")]
    Payload(String),
}

/// Caller contract violations of the lock API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("a lock request is already outstanding (state: {0:?})")]
    AlreadyRequested(LockState),

    #[error("release without holding the lock (state: {0:?})")]
    NotHolding(LockState),

    #[error("the lock request was dropped before it was decided")]
    Abandoned,

    #[error(transparent)]
    Closed(#[from] ActorClosed),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("the process actor is no longer running")]
pub struct ActorClosed;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to process {0}")]
    UnknownPeer(ProcessId),

    #[error("outbound queue for process {0} is closed")]
    Closed(ProcessId),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons an inbound line is discarded without touching protocol state.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("message from process {0}, which is not a peer")]
    UnknownSender(ProcessId),
}

impl ProcessError {
    /// Whether the line belongs to some other protocol and can be dropped without a warning.
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, Self::Message(MessageError::UnknownKind(_)))
    }
}
