//! Redis Serialization Protocol (RESP) implementation.
//!
//! This module implements RESP2 and RESP3 encoding and incremental decoding.
//! The decoder is zero-copy: tokens carry segmented views into the input
//! rather than owned payloads.

mod literals;
mod reader;
mod scan;
mod token;
mod writer;

pub use literals::{CMD_AUTH, CMD_HELLO, CMD_PING, CMD_SETNAME, HELLO_3, PING, PROTO_3};
pub use reader::{ReaderOptions, RespReader};
pub use scan::{prefixed_length, signed_integer};
pub use token::{Token, TokenKind};
pub use writer::{RespWriter, WriterOptions};

/// RESP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Not yet negotiated; the handshake decides.
    #[default]
    Unknown,
    /// RESP2 (Redis 2.0+)
    Resp2,
    /// RESP3 (Redis 6.0+)
    Resp3,
}

/// CRLF terminator bytes.
pub const CRLF: &[u8] = b"\r\n";

/// Type markers for RESP.
pub mod markers {
    /// Simple string: +
    pub const SIMPLE_STRING: u8 = b'+';
    /// Error: -
    pub const ERROR: u8 = b'-';
    /// Integer: :
    pub const INTEGER: u8 = b':';
    /// Bulk string: $
    pub const BULK_STRING: u8 = b'$';
    /// Array: *
    pub const ARRAY: u8 = b'*';

    // RESP3 additions
    /// Boolean: #
    pub const BOOLEAN: u8 = b'#';
    /// Double: ,
    pub const DOUBLE: u8 = b',';
    /// Big number: (
    pub const BIG_NUMBER: u8 = b'(';
    /// Verbatim string: =
    pub const VERBATIM_STRING: u8 = b'=';
    /// Map: %
    pub const MAP: u8 = b'%';
    /// Set: ~
    pub const SET: u8 = b'~';
    /// Attribute: |
    pub const ATTRIBUTE: u8 = b'|';
    /// Push: >
    pub const PUSH: u8 = b'>';
}
