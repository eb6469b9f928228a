//! Error types.
//!
//! Only configuration-time failures ever reach a caller as an `Err`. Overload
//! on the producer side is reported through [`crate::Outcome`] and the
//! counters in [`crate::stats`].

use std::io;

use nix::errno::Errno;
use thiserror::Error;

use crate::pool::RecordHandle;

/// No free record slot was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("record pool exhausted")]
pub struct PoolExhausted;

/// A rejected enqueue. The handle is handed back so the caller can release it.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transfer queue full")]
    Full(RecordHandle),
    #[error("transfer queue closed")]
    Closed(RecordHandle),
}

impl QueueError {
    pub fn into_handle(self) -> RecordHandle {
        match self {
            QueueError::Full(handle) | QueueError::Closed(handle) => handle,
        }
    }
}

/// Failure reported by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("sink is closed")]
    Closed,
    #[error("sink panicked: {0}")]
    Panicked(String),
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// Errors surfaced synchronously while building or starting a logger.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("pool capacity must be between 1 and {max}, got {got}")]
    InvalidPoolCapacity { got: usize, max: usize },
    #[error("queue capacity must be at least 1")]
    InvalidQueueCapacity,
    #[error("message capacity must be between 16 and {max} bytes, got {got}")]
    InvalidMessageCapacity { got: usize, max: usize },
    #[error("time precision must be 0..=9, got {0}")]
    InvalidTimePrecision(u8),
    #[error("too many channels (max {0})")]
    TooManyChannels(usize),
    #[error("too many tags (max {0})")]
    TooManyTags(usize),
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to construct sink `{name}`: {source}")]
    Sink {
        name: String,
        #[source]
        source: SinkError,
    },
    #[error("failed to spawn logging thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("another logger already drains on termination signals")]
    TerminationHandlersInUse,
    #[error("failed to install termination handler: {0}")]
    SignalAction(#[source] Errno),
}
