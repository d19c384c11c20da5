//! Core error types for portmux

use pm_protocol::{ProtocolError, StreamId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors local to a single stream.
///
/// None of these affect other streams on the same connection. End of
/// inbound data is reported as a zero-length read, not as an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was aborted locally, by the peer, or by connection failure
    #[error("Stream was reset")]
    Reset,

    /// The write side was already closed
    #[error("Stream is closed for writing")]
    Closed,

    /// The operation deadline expired; the stream is still usable
    #[error("Stream operation timed out")]
    Timeout,
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match err {
            StreamError::Reset => std::io::ErrorKind::ConnectionReset,
            StreamError::Closed => std::io::ErrorKind::BrokenPipe,
            StreamError::Timeout => std::io::ErrorKind::TimedOut,
        };
        std::io::Error::new(kind, err)
    }
}

/// Connection-level multiplexer errors
#[derive(Error, Debug)]
pub enum MuxError {
    /// Malformed frame from the peer
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer opened a stream with an identifier that is already in use
    #[error("Duplicate stream: {0}")]
    DuplicateStream(StreamId),

    /// The connection has terminated
    #[error("Connection closed")]
    ConnectionClosed,

    /// Every identifier in this side's range has been used
    #[error("No stream IDs left on this connection")]
    StreamIdsExhausted,

    /// Transport I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Timeout was zero or negative
    #[error("timeout must be a positive duration")]
    InvalidTimeout,

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
