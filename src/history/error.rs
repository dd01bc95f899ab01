//! Error types for history persistence and the record codec.

use std::fmt;

/// Result type alias for durable-history operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors that can occur while touching the durable history log.
///
/// These never make a worker give up: the in-memory history stays
/// authoritative and the failed write is retried on the next cycle.
#[derive(Debug)]
pub enum PersistenceError {
    /// I/O error (file access, etc.)
    Io(std::io::Error),

    /// The log path cannot be used (e.g. parent is not a directory)
    InvalidPath(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(err) => write!(f, "history log I/O error: {}", err),
            PersistenceError::InvalidPath(msg) => write!(f, "invalid history log path: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err)
    }
}

/// Errors that can occur while decoding a binary history record.
///
/// Decoders must refuse what they do not understand: an unrecognized
/// version tag is an error, never a guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Version tag newer than this reader understands (or zero)
    UnsupportedVersion(u32),

    /// Record ended before all declared fields were read
    UnexpectedEof,

    /// Alert level ordinal outside the known range
    InvalidLevel(u8),

    /// Embedded string is not valid UTF-8
    InvalidUtf8,

    /// Timestamp does not map to a representable instant
    InvalidTimestamp(i64),

    /// Record frame finished with unread bytes left over
    TrailingBytes(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported record version: {}", version)
            }
            DecodeError::UnexpectedEof => write!(f, "record truncated"),
            DecodeError::InvalidLevel(ordinal) => {
                write!(f, "invalid alert level ordinal: {}", ordinal)
            }
            DecodeError::InvalidUtf8 => write!(f, "record string is not valid UTF-8"),
            DecodeError::InvalidTimestamp(millis) => {
                write!(f, "record timestamp out of range: {}", millis)
            }
            DecodeError::TrailingBytes(count) => {
                write!(f, "record frame has {} undecoded trailing bytes", count)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
