//! Forward-only RESP encoder.
//!
//! The encoder appends whole tokens into a [`PipeWriter`]'s staged memory
//! and only commits them to the pipe on [`flush`](RespWriter::flush), so a
//! half-written token is never visible downstream. Decimal formatting is
//! allocation-free.

use crate::buffer::PipeWriter;
use crate::error::EncodeError;
use crate::protocol::markers;
use crate::MAX_BULK_SIZE;
use memchr::memchr2;

/// Memory hint for the first allocation of a command.
const INITIAL_HINT: usize = 256;

/// Memory hint once a flush has shown the sink is in steady use.
const POST_FLUSH_HINT: usize = 4 * 1024;

/// Longest decimal rendering of an `i64`, sign included.
const MAX_DECIMAL: usize = 20;

/// Encoder options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterOptions {
    /// Skip size and character validation.
    pub skip_validation: bool,
}

/// Forward-only RESP token writer over a pipe's staging memory.
///
/// Callers write entire tokens, then [`flush`](RespWriter::flush) to commit
/// them; the pipe's own async flush publishes the bytes to the reader side.
pub struct RespWriter<'a> {
    sink: &'a mut PipeWriter,
    options: WriterOptions,
    pending: usize,
    flushed_once: bool,
}

impl<'a> RespWriter<'a> {
    /// An encoder with validation enabled.
    pub fn new(sink: &'a mut PipeWriter) -> Self {
        Self::with_options(sink, WriterOptions::default())
    }

    /// An encoder with explicit options.
    pub fn with_options(sink: &'a mut PipeWriter, options: WriterOptions) -> Self {
        Self {
            sink,
            options,
            pending: 0,
            flushed_once: false,
        }
    }

    /// Bytes written since the last flush.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Commits all pending bytes to the sink. The next write requests fresh
    /// memory with a larger hint.
    pub fn flush(&mut self) {
        self.sink.advance(self.pending);
        self.pending = 0;
        self.flushed_once = true;
    }

    /// `*<n>\r\n`; `n == -1` emits the null-array literal.
    pub fn write_array_start(&mut self, n: i64) -> Result<(), EncodeError> {
        if n < -1 && !self.options.skip_validation {
            return Err(EncodeError::ArrayLengthInvalid(n));
        }
        self.write_header(markers::ARRAY, n);
        Ok(())
    }

    /// `$<len>\r\n<bytes>\r\n`.
    pub fn write_bulk_string(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if bytes.len() > MAX_BULK_SIZE && !self.options.skip_validation {
            return Err(EncodeError::BulkStringTooLarge {
                len: bytes.len(),
                max: MAX_BULK_SIZE,
            });
        }
        self.write_header(markers::BULK_STRING, bytes.len() as i64);
        let buf = self.reserve(bytes.len() + 2);
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = b'\r';
        buf[bytes.len() + 1] = b'\n';
        self.pending += bytes.len() + 2;
        Ok(())
    }

    /// Fast path for a one-byte payload: `$1\r\n<b>\r\n`.
    pub fn write_bulk_string_byte(&mut self, b: u8) {
        let buf = self.reserve(7);
        buf[..7].copy_from_slice(&[b'$', b'1', b'\r', b'\n', b, b'\r', b'\n']);
        self.pending += 7;
    }

    /// `+<bytes>\r\n`. The payload may not contain CR or LF.
    pub fn write_simple_string(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if !self.options.skip_validation && memchr2(b'\r', b'\n', bytes).is_some() {
            return Err(EncodeError::SimpleStringContainsNewline);
        }
        let buf = self.reserve(bytes.len() + 3);
        buf[0] = markers::SIMPLE_STRING;
        buf[1..1 + bytes.len()].copy_from_slice(bytes);
        buf[1 + bytes.len()] = b'\r';
        buf[2 + bytes.len()] = b'\n';
        self.pending += bytes.len() + 3;
        Ok(())
    }

    /// `:<decimal>\r\n`.
    pub fn write_integer(&mut self, i: i64) {
        if (0..10).contains(&i) {
            let buf = self.reserve(4);
            buf[..4].copy_from_slice(&[markers::INTEGER, b'0' + i as u8, b'\r', b'\n']);
            self.pending += 4;
            return;
        }
        self.write_header(markers::INTEGER, i);
    }

    /// Appends pre-encoded bytes verbatim, no validation.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        let buf = self.reserve(bytes.len());
        buf[..bytes.len()].copy_from_slice(bytes);
        self.pending += bytes.len();
    }

    /// One whole command: an array header plus one bulk string per argument.
    pub fn write_command(&mut self, args: &[&[u8]]) -> Result<(), EncodeError> {
        self.write_array_start(args.len() as i64)?;
        for arg in args {
            if arg.len() == 1 {
                self.write_bulk_string_byte(arg[0]);
            } else {
                self.write_bulk_string(arg)?;
            }
        }
        Ok(())
    }

    /// `<marker><decimal>\r\n`, shared by headers and integers.
    fn write_header(&mut self, marker: u8, n: i64) {
        let mut scratch = [0u8; MAX_DECIMAL];
        let digits = fmt_i64(n, &mut scratch);
        let total = 1 + digits.len() + 2;
        let buf = self.reserve(total);
        buf[0] = marker;
        buf[1..1 + digits.len()].copy_from_slice(digits);
        buf[1 + digits.len()] = b'\r';
        buf[2 + digits.len()] = b'\n';
        self.pending += total;
    }

    /// Writable memory past the pending region, at least `need` bytes.
    fn reserve(&mut self, need: usize) -> &mut [u8] {
        let hint = if self.flushed_once {
            POST_FLUSH_HINT
        } else {
            INITIAL_HINT
        };
        let want = (self.pending + need).max(hint);
        &mut self.sink.get_memory(want)[self.pending..]
    }
}

/// Formats `n` as ASCII decimal into `scratch`, no leading zeros.
fn fmt_i64(n: i64, scratch: &mut [u8; MAX_DECIMAL]) -> &[u8] {
    if n == 0 {
        scratch[0] = b'0';
        return &scratch[..1];
    }
    let negative = n < 0;
    // Work in negative space so i64::MIN formats without overflow.
    let mut rest = if negative { n } else { -n };
    let mut at = MAX_DECIMAL;
    while rest != 0 {
        at -= 1;
        scratch[at] = b'0' + (-(rest % 10)) as u8;
        rest /= 10;
    }
    if negative {
        at -= 1;
        scratch[at] = b'-';
    }
    &scratch[at..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::pipe;

    /// Runs `f` against a fresh encoder and returns the committed bytes.
    fn encode(f: impl FnOnce(&mut RespWriter<'_>)) -> Vec<u8> {
        let (mut w, mut r) = pipe();
        {
            let mut enc = RespWriter::new(&mut w);
            f(&mut enc);
            enc.flush();
        }
        futures_block(async move {
            w.flush().await;
            let res = r.read().await;
            res.buffer.to_vec()
        })
    }

    fn futures_block<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn test_array_start() {
        assert_eq!(encode(|e| e.write_array_start(3).unwrap()), b"*3\r\n");
        assert_eq!(encode(|e| e.write_array_start(0).unwrap()), b"*0\r\n");
        assert_eq!(encode(|e| e.write_array_start(-1).unwrap()), b"*-1\r\n");
    }

    #[test]
    fn test_array_start_rejects_negative() {
        let (mut w, _r) = pipe();
        let mut enc = RespWriter::new(&mut w);
        assert_eq!(
            enc.write_array_start(-2),
            Err(EncodeError::ArrayLengthInvalid(-2))
        );
    }

    #[test]
    fn test_bulk_string_with_internal_crlf() {
        assert_eq!(
            encode(|e| e.write_bulk_string(b"abc\r\n123").unwrap()),
            b"$8\r\nabc\r\n123\r\n"
        );
    }

    #[test]
    fn test_bulk_string_empty() {
        assert_eq!(encode(|e| e.write_bulk_string(b"").unwrap()), b"$0\r\n\r\n");
    }

    #[test]
    fn test_bulk_string_byte() {
        assert_eq!(encode(|e| e.write_bulk_string_byte(b'3')), b"$1\r\n3\r\n");
    }

    #[test]
    fn test_simple_string() {
        assert_eq!(
            encode(|e| e.write_simple_string(b"OK").unwrap()),
            b"+OK\r\n"
        );
    }

    #[test]
    fn test_simple_string_rejects_newlines() {
        let (mut w, _r) = pipe();
        let mut enc = RespWriter::new(&mut w);
        assert_eq!(
            enc.write_simple_string(b"a\rb"),
            Err(EncodeError::SimpleStringContainsNewline)
        );
        assert_eq!(
            enc.write_simple_string(b"a\nb"),
            Err(EncodeError::SimpleStringContainsNewline)
        );

        let mut relaxed = RespWriter::with_options(
            &mut w,
            WriterOptions {
                skip_validation: true,
            },
        );
        assert!(relaxed.write_simple_string(b"a\rb").is_ok());
    }

    #[test]
    fn test_integers() {
        assert_eq!(encode(|e| e.write_integer(0)), b":0\r\n");
        assert_eq!(encode(|e| e.write_integer(7)), b":7\r\n");
        assert_eq!(encode(|e| e.write_integer(1234)), b":1234\r\n");
        assert_eq!(encode(|e| e.write_integer(-42)), b":-42\r\n");
        assert_eq!(
            encode(|e| e.write_integer(i64::MIN)),
            b":-9223372036854775808\r\n"
        );
        assert_eq!(
            encode(|e| e.write_integer(i64::MAX)),
            b":9223372036854775807\r\n"
        );
    }

    #[test]
    fn test_write_command() {
        assert_eq!(
            encode(|e| e.write_command(&[b"SET", b"key", b"value"]).unwrap()),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_write_raw() {
        assert_eq!(
            encode(|e| e.write_raw(b"*1\r\n$4\r\nPING\r\n")),
            b"*1\r\n$4\r\nPING\r\n"
        );
    }

    #[test]
    fn test_unflushed_tokens_are_not_committed() {
        let (mut w, mut r) = pipe();
        {
            let mut enc = RespWriter::new(&mut w);
            enc.write_simple_string(b"OK").unwrap();
            // Dropped without enc.flush(): nothing committed.
        }
        futures_block(async move {
            let res = w.flush().await;
            assert!(!res.is_canceled);
            w.complete();
            let res = r.read().await;
            assert!(res.buffer.is_empty());
            assert!(res.is_completed);
        });
    }

    #[test]
    fn test_multiple_tokens_single_flush() {
        let out = encode(|e| {
            e.write_array_start(2).unwrap();
            e.write_bulk_string(b"GET").unwrap();
            e.write_bulk_string(b"k").unwrap();
        });
        assert_eq!(out, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
    }
}
