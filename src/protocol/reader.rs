//! Incremental RESP decoder.
//!
//! The decoder is forward-only and commits advancement on whole-token
//! boundaries: when the input ends mid-token, `try_read` returns `Ok(None)`
//! without moving the cursor, and the caller retries once more bytes are
//! appended. A little re-scanning buys a resumption model with no mid-token
//! state to carry between calls.

use crate::buffer::{ByteSequence, SeqReader};
use crate::error::{Error, ProtocolError};
use crate::protocol::{markers, scan, Token, TokenKind};
use crate::MAX_BULK_SIZE;

/// Decoder options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Skip payload character checks and size caps. Framing is still
    /// enforced.
    pub skip_validation: bool,
}

/// Incremental, token-boundary RESP2/RESP3 decoder.
///
/// # Usage
///
/// ```
/// use remora::{ByteSequence, RespReader, SeqReader, TokenKind};
///
/// let seq = ByteSequence::from_bytes(&b"+OK\r\n"[..]);
/// let mut cursor = SeqReader::new(&seq);
/// let mut reader = RespReader::new();
///
/// let token = reader.try_read(&mut cursor).unwrap().unwrap();
/// assert_eq!(token.kind, TokenKind::SimpleString);
/// assert_eq!(token.value_bytes().as_ref(), b"OK");
/// ```
#[derive(Debug, Default)]
pub struct RespReader {
    options: ReaderOptions,
    bytes_consumed: u64,
    last_kind: Option<TokenKind>,
    last_token: ByteSequence,
    last_value: ByteSequence,
}

impl RespReader {
    /// A decoder with validation enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder with explicit options.
    pub fn with_options(options: ReaderOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Total bytes consumed across all successful reads since the last
    /// [`reset`](RespReader::reset).
    #[inline]
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Kind of the most recently decoded token, if any.
    #[inline]
    pub fn last_token_kind(&self) -> Option<TokenKind> {
        self.last_kind
    }

    /// Whole-token span of the most recently decoded token.
    #[inline]
    pub fn token_sequence(&self) -> &ByteSequence {
        &self.last_token
    }

    /// Value span of the most recently decoded token.
    #[inline]
    pub fn value_sequence(&self) -> &ByteSequence {
        &self.last_value
    }

    /// Clears token state and zeroes the cumulative byte counter.
    pub fn reset(&mut self) {
        self.bytes_consumed = 0;
        self.clear_last();
    }

    fn clear_last(&mut self) {
        self.last_kind = None;
        self.last_token = ByteSequence::new();
        self.last_value = ByteSequence::new();
    }

    /// Attempts to decode the next token at the cursor.
    ///
    /// Returns `Ok(Some(token))` and advances the cursor past the token on
    /// success, `Ok(None)` (cursor untouched) when more bytes are needed, or
    /// an error for malformed input.
    pub fn try_read(&mut self, r: &mut SeqReader<'_>) -> Result<Option<Token>, Error> {
        self.clear_last();
        match self.read_token(r) {
            Ok(token) => {
                self.commit(r, &token);
                Ok(Some(token))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Consumes the `length + 2` payload bytes that follow a bulk-string or
    /// verbatim-string header.
    ///
    /// The caller must not invoke this after a `Null` token: a `-1` length
    /// is self-contained.
    pub fn try_read_bulk_string(
        &mut self,
        r: &mut SeqReader<'_>,
        length: i64,
    ) -> Result<Option<Token>, Error> {
        self.clear_last();
        if length < 0 {
            return Err(Error::ArgumentOutOfRange(format!(
                "bulk string length {length} is negative"
            )));
        }
        let length = length as u64;
        if length > MAX_BULK_SIZE as u64 && !self.options.skip_validation {
            return Err(Error::ArgumentOutOfRange(format!(
                "bulk string length {length} exceeds {MAX_BULK_SIZE}"
            )));
        }

        let start = r.position();
        if r.remaining() < length + 2 {
            return Ok(None);
        }
        let seq = r.sequence();
        let payload_end = start + length;
        // The terminator may straddle a segment boundary; check bytewise.
        if seq.value_at(payload_end) != Some(b'\r')
            || (!self.options.skip_validation && seq.value_at(payload_end + 1) != Some(b'\n'))
        {
            return Err(ProtocolError::UnterminatedBulkString { offset: length }.into());
        }

        let token = Token {
            kind: TokenKind::BulkString,
            token_span: seq.slice(start, payload_end + 2),
            value_span: seq.slice(start, payload_end),
        };
        self.commit(r, &token);
        Ok(Some(token))
    }

    fn commit(&mut self, r: &mut SeqReader<'_>, token: &Token) {
        r.advance_to(token.token_span.end_index());
        self.bytes_consumed += token.token_len();
        self.last_kind = Some(token.kind);
        self.last_token = token.token_span.clone();
        self.last_value = token.value_span.clone();
    }

    fn read_token(&self, r: &mut SeqReader<'_>) -> Result<Token, ProtocolError> {
        let start = r.position();
        let marker = r.peek().ok_or(ProtocolError::Incomplete)?;
        if !is_marker(marker) {
            // Reject before looking for a terminator: garbage input may
            // never contain one.
            return Err(ProtocolError::UnexpectedControlByte {
                byte: marker,
                offset: start,
            });
        }
        let (token_span, value_span) = self.read_line(r, start)?;

        let kind = match marker {
            markers::SIMPLE_STRING => {
                self.check_line_payload(&value_span)?;
                TokenKind::SimpleString
            }
            markers::ERROR => {
                self.check_line_payload(&value_span)?;
                TokenKind::Error
            }
            markers::INTEGER => {
                scan::signed_integer(&value_span)?;
                TokenKind::Integer
            }
            markers::DOUBLE => {
                if value_span.is_empty() && !self.options.skip_validation {
                    return Err(ProtocolError::InvalidIntegerDigit);
                }
                TokenKind::Double
            }
            markers::BIG_NUMBER => {
                self.check_big_number(&value_span)?;
                TokenKind::BigNumber
            }
            markers::BOOLEAN => {
                self.check_boolean(&value_span)?;
                TokenKind::Boolean
            }
            markers::BULK_STRING => self.read_length(&value_span, HeaderKind::BulkString)?,
            markers::ARRAY => self.read_length(&value_span, HeaderKind::Array)?,
            markers::MAP => self.read_length(&value_span, HeaderKind::Map)?,
            markers::SET => self.read_length(&value_span, HeaderKind::Set)?,
            markers::PUSH => self.read_length(&value_span, HeaderKind::Push)?,
            markers::ATTRIBUTE => self.read_length(&value_span, HeaderKind::Attribute)?,
            // is_marker covered every other byte already.
            _ => self.read_length(&value_span, HeaderKind::Verbatim)?,
        };

        let token = Token {
            kind,
            token_span,
            value_span,
        };
        Ok(token)
    }

    /// Frames one line token: control byte through CRLF.
    fn read_line(
        &self,
        r: &SeqReader<'_>,
        start: u64,
    ) -> Result<(ByteSequence, ByteSequence), ProtocolError> {
        let cr = r.find_crlf(start + 1).ok_or(ProtocolError::Incomplete)?;
        let seq = r.sequence();
        Ok((seq.slice(start, cr + 2), seq.slice(start + 1, cr)))
    }

    /// Simple strings and errors may not contain CR or LF.
    fn check_line_payload(&self, value: &ByteSequence) -> Result<(), ProtocolError> {
        if self.options.skip_validation {
            return Ok(());
        }
        let stray = value
            .bytes_range(value.start_index(), value.end_index())
            .any(|b| b == b'\r' || b == b'\n');
        if stray {
            Err(ProtocolError::UnterminatedLine)
        } else {
            Ok(())
        }
    }

    fn check_big_number(&self, value: &ByteSequence) -> Result<(), ProtocolError> {
        if self.options.skip_validation {
            return Ok(());
        }
        let mut iter = value.bytes_range(value.start_index(), value.end_index());
        let mut first = iter.next().ok_or(ProtocolError::InvalidIntegerDigit)?;
        if first == b'-' {
            first = iter.next().ok_or(ProtocolError::InvalidIntegerDigit)?;
        }
        if !first.is_ascii_digit() || iter.any(|b| !b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidIntegerDigit);
        }
        Ok(())
    }

    fn check_boolean(&self, value: &ByteSequence) -> Result<(), ProtocolError> {
        if self.options.skip_validation {
            return Ok(());
        }
        let byte = value.value_at(value.start_index());
        if value.len() == 1 && matches!(byte, Some(b't') | Some(b'f')) {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedControlByte {
                byte: byte.unwrap_or(0),
                offset: value.start_index(),
            })
        }
    }

    fn read_length(
        &self,
        value: &ByteSequence,
        header: HeaderKind,
    ) -> Result<TokenKind, ProtocolError> {
        let len = scan::prefixed_length(value)?;
        if len == -1 {
            return match header {
                // Null bulk strings and null arrays are self-contained.
                HeaderKind::BulkString | HeaderKind::Array => Ok(TokenKind::Null),
                _ => Err(ProtocolError::UnexpectedNull),
            };
        }
        if matches!(header, HeaderKind::BulkString | HeaderKind::Verbatim)
            && len as u64 > MAX_BULK_SIZE as u64
            && !self.options.skip_validation
        {
            return Err(ProtocolError::LengthOutOfRange(len));
        }
        Ok(match header {
            HeaderKind::BulkString => TokenKind::BulkStringHeader(len),
            HeaderKind::Array => TokenKind::ArrayHeader(len),
            HeaderKind::Map => TokenKind::MapHeader(len),
            HeaderKind::Set => TokenKind::SetHeader(len),
            HeaderKind::Push => TokenKind::PushHeader(len),
            HeaderKind::Attribute => TokenKind::AttributeHeader(len),
            HeaderKind::Verbatim => TokenKind::VerbatimStringHeader(len),
        })
    }
}

/// Check if a byte opens a known RESP2/RESP3 token.
#[inline]
fn is_marker(b: u8) -> bool {
    matches!(
        b,
        markers::SIMPLE_STRING
            | markers::ERROR
            | markers::INTEGER
            | markers::BULK_STRING
            | markers::ARRAY
            | markers::BOOLEAN
            | markers::DOUBLE
            | markers::BIG_NUMBER
            | markers::VERBATIM_STRING
            | markers::MAP
            | markers::SET
            | markers::ATTRIBUTE
            | markers::PUSH
    )
}

#[derive(Clone, Copy)]
enum HeaderKind {
    BulkString,
    Array,
    Map,
    Set,
    Push,
    Attribute,
    Verbatim,
}
