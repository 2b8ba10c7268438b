//! Fuzz target for the incremental RESP decoder.
//!
//! Feeds arbitrary bytes, both contiguous and re-fragmented, and drives the
//! decoder to exhaustion. The decoder must never panic and must produce the
//! same tokens regardless of fragmentation.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use remora::{ByteSequence, RespReader, SeqReader, TokenKind};

fn drive(seq: &ByteSequence) -> Vec<(TokenKind, Vec<u8>)> {
    let mut cursor = SeqReader::new(seq);
    let mut reader = RespReader::new();
    let mut tokens = Vec::new();
    loop {
        match reader.try_read(&mut cursor) {
            Ok(Some(token)) => {
                let mut kind = token.kind;
                let mut value = token.value_span.to_vec();
                if let TokenKind::BulkStringHeader(len) | TokenKind::VerbatimStringHeader(len) =
                    token.kind
                {
                    match reader.try_read_bulk_string(&mut cursor, len) {
                        Ok(Some(payload)) => {
                            kind = payload.kind;
                            value = payload.value_span.to_vec();
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                tokens.push((kind, value));
            }
            Ok(None) | Err(_) => break,
        }
    }
    tokens
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    // First byte picks the fragmentation; the rest is the input.
    let chunk = (data[0] as usize % 16) + 1;
    let input = &data[1..];

    let contiguous = ByteSequence::from_bytes(Bytes::copy_from_slice(input));
    let mut fragmented = ByteSequence::new();
    for piece in input.chunks(chunk) {
        fragmented.append(Bytes::copy_from_slice(piece));
    }

    let a = drive(&contiguous);
    let b = drive(&fragmented);
    assert_eq!(a, b);
});
