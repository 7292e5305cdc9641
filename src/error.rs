//! Error types for gamewire
//!
//! Provides a unified error type for all operations, plus the two error
//! shapes that cross component seams: codec failures and transport failures.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias using GamewireError
pub type Result<T> = std::result::Result<T, GamewireError>;

/// Unified error type for gamewire operations
#[derive(Debug, Error)]
pub enum GamewireError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Connection is already in use")]
    ConnectionBusy,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No tokio runtime available")]
    NoRuntime,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure of the pluggable message codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("compression failed: {0}")]
    Compression(String),
}

/// Which asynchronous operation a transport error surfaced on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Connect,
    Accept,
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Connect => "Connect",
            Direction::Accept => "Accept",
            Direction::Read => "Read",
            Direction::Write => "Write",
        };
        f.write_str(name)
    }
}

/// A socket-level failure, tagged with the direction it occurred on
#[derive(Debug, Error)]
#[error("[{direction}] {source}")]
pub struct TransportError {
    pub direction: Direction,
    #[source]
    pub source: io::Error,
}

impl TransportError {
    pub fn new(direction: Direction, source: io::Error) -> Self {
        Self { direction, source }
    }

    /// Platform error code, when the OS supplied one
    pub fn code(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// Whether the error is the peer resetting or aborting the stream
    pub fn is_reset(&self) -> bool {
        matches!(
            self.source.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        )
    }
}
