//! Decoded RESP tokens.

use crate::buffer::ByteSequence;
use bytes::Bytes;

/// The syntactic kind of a decoded token.
///
/// Header kinds carry the parsed element or byte count, which is always
/// non-negative: a `-1` length decodes to [`TokenKind::Null`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `+...\r\n`
    SimpleString,
    /// `-...\r\n`
    Error,
    /// `:...\r\n`
    Integer,
    /// `$<len>\r\n` — the payload follows as a separate [`BulkString`] token.
    ///
    /// [`BulkString`]: TokenKind::BulkString
    BulkStringHeader(i64),
    /// The `<bytes>\r\n` payload after a bulk-string header.
    BulkString,
    /// `*<len>\r\n`
    ArrayHeader(i64),
    /// `$-1\r\n` or `*-1\r\n`
    Null,
    /// `%<len>\r\n` (RESP3) — `len` counts pairs.
    MapHeader(i64),
    /// `~<len>\r\n` (RESP3)
    SetHeader(i64),
    /// `><len>\r\n` (RESP3)
    PushHeader(i64),
    /// `|<len>\r\n` (RESP3) — `len` counts pairs.
    AttributeHeader(i64),
    /// `,<decimal>\r\n` (RESP3)
    Double,
    /// `#t\r\n` / `#f\r\n` (RESP3)
    Boolean,
    /// `(<digits>\r\n` (RESP3)
    BigNumber,
    /// `=<len>\r\n` (RESP3) — the payload follows like a bulk string and
    /// starts with a 3-byte encoding tag and a colon.
    VerbatimStringHeader(i64),
}

/// One syntactically complete RESP token.
///
/// Both spans are views into the decoder's input: `token_span` covers the
/// control byte and terminators, `value_span` only the semantic payload.
/// Neither copies the underlying bytes.
#[derive(Debug, Clone)]
pub struct Token {
    /// What was decoded.
    pub kind: TokenKind,
    /// The whole token, control byte and CRLF included.
    pub token_span: ByteSequence,
    /// The semantic payload (no control byte, no terminator).
    pub value_span: ByteSequence,
}

impl Token {
    /// The payload as one `Bytes` (zero-copy when it sits in one segment).
    pub fn value_bytes(&self) -> Bytes {
        self.value_span.to_bytes()
    }

    /// Payload length in bytes.
    #[inline]
    pub fn value_len(&self) -> u64 {
        self.value_span.len()
    }

    /// Whole-token length in bytes.
    #[inline]
    pub fn token_len(&self) -> u64 {
        self.token_span.len()
    }
}
