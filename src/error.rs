//! Error types for remora.
//!
//! The hierarchy mirrors the layering of the crate: `ProtocolError` for
//! decoding, `EncodeError` for encoding, and `Error` as the caller-facing
//! umbrella covering transport, pool, and state failures.

use std::io;
use thiserror::Error;

/// Result type alias for remora operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for remora.
#[derive(Error, Debug)]
pub enum Error {
    /// RESP decoding errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// RESP encoding errors
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Socket open, read, or write failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation attempted on a connection that has already failed
    #[error("connection is broken and cannot be reused")]
    ConnectionBroken,

    /// The server rejected the connection handshake
    #[error("handshake failed{}", fmt_server_message(.server_message))]
    Handshake {
        /// Error reply sent by the server, if any
        server_message: Option<String>,
    },

    /// Waited for a pooled connection longer than the provided timeout
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// The provided cancellation signal fired
    #[error("operation canceled")]
    Canceled,

    /// Caller passed an argument outside the accepted range
    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),

    /// Operation not valid in the connection's current state
    #[error("operation `{operation}` invalid in state {status}")]
    InvalidState {
        /// The attempted operation
        operation: &'static str,
        /// Connection status at the time of the call
        status: &'static str,
    },

    /// Configuration validation or parse failure
    #[error("configuration error: {0}")]
    Config(String),
}

fn fmt_server_message(msg: &Option<String>) -> String {
    match msg {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

/// Protocol-level errors raised by the RESP decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First byte of a token is not a known RESP control byte
    #[error("unexpected control byte {byte:#04x} at stream offset {offset}")]
    UnexpectedControlByte {
        /// The offending byte
        byte: u8,
        /// Stream offset of the byte
        offset: u64,
    },

    /// A line token contains a stray CR or LF before its terminator
    #[error("line token contains an unterminated CR or LF")]
    UnterminatedLine,

    /// Bulk string payload not followed by CRLF
    #[error("bulk string not terminated by CRLF at payload offset {offset}")]
    UnterminatedBulkString {
        /// Offset of the expected terminator, relative to the payload start
        offset: u64,
    },

    /// Non-digit byte inside an integer or length
    #[error("invalid digit in integer")]
    InvalidIntegerDigit,

    /// Integer does not fit in a signed 64-bit value
    #[error("integer overflows the signed 64-bit range")]
    IntegerOverflow,

    /// Prefixed length outside the legal range
    #[error("length out of range: {0}")]
    LengthOutOfRange(i64),

    /// A null (`-1`) length where the protocol forbids one
    #[error("unexpected null length")]
    UnexpectedNull,

    /// Not an error in the stream, only a signal that more bytes are needed.
    /// Mapped to `Ok(None)` before reaching callers.
    #[error("incomplete token, need more data")]
    Incomplete,
}

/// Validation failures raised by the RESP encoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Simple string payloads may not contain CR or LF
    #[error("simple string payload contains CR or LF")]
    SimpleStringContainsNewline,

    /// Bulk string exceeds the protocol maximum
    #[error("bulk string too large: {len} bytes (max: {max})")]
    BulkStringTooLarge {
        /// Attempted payload length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Array length below `-1`
    #[error("invalid array length: {0}")]
    ArrayLengthInvalid(i64),
}

impl Error {
    /// Returns true if retrying the operation on a fresh connection could
    /// succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionBroken | Error::PoolTimeout
        )
    }

    /// Returns true if the failure invalidates the connection it occurred on.
    #[inline]
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Io(_) | Error::ConnectionBroken | Error::Handshake { .. }
        )
    }
}
