use std::io;

use thiserror::Error;

use crate::trace::{Event, EventKind};

/// Errors raised while recording, decoding or scheduling a trace.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown operation kind {0}")]
    InvalidOperation(u8),

    #[error("invalid argument for {kind:?}: {reason}")]
    InvalidArgument { kind: EventKind, reason: String },

    #[error("string id {0} is not in the string table")]
    OutOfRange(u32),

    #[error("event stream length {len} is not a multiple of {}", Event::SIZE)]
    TruncatedEvents { len: usize },

    #[error("corrupt string pool at offset {offset}")]
    CorruptStringPool { offset: usize },

    #[error("payload stream too short: event {index} needs {needed} bytes at offset {offset}")]
    TruncatedPayload {
        index: u32,
        offset: u64,
        needed: u32,
    },

    #[error("invalid flag: {0}")]
    InvalidFlag(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("descriptor {0} is not registered")]
    DescriptorNotFound(u32),

    #[error("descriptor {0} is already registered")]
    DescriptorRegistered(u32),

    #[error("path {0} is already locked")]
    AlreadyLocked(u32),

    #[error("path {0} is not locked")]
    NotLocked(u32),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Lock and descriptor bookkeeping failures. These mean the trace or the
    /// scheduler state is inconsistent and the run cannot continue.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::DescriptorNotFound(_)
                | Error::DescriptorRegistered(_)
                | Error::AlreadyLocked(_)
                | Error::NotLocked(_)
        )
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}

/// Fatal outcomes of a replay run.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("event {index} {event}: {source}")]
    Event {
        index: u32,
        event: Event,
        #[source]
        source: Error,
    },

    #[error("replay stalled at event {cursor} of {total} with nothing in flight")]
    Stalled { cursor: u32, total: u32 },

    #[error("replay finished with {count} path locks still held")]
    LeakedLocks { count: usize },

    #[error("completion for unknown event {0}")]
    UnknownCompletion(u32),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
