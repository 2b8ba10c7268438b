//! Chained byte segments forming a logical contiguous sequence.
//!
//! Positions are absolute stream offsets (`u64`), not indices into any one
//! buffer: a sequence that begins at offset 4096 answers `value_at(4100)`
//! from whichever segment covers that offset. Segments are `Bytes` handles,
//! so slicing shares the underlying allocations.

use bytes::{Bytes, BytesMut};
use memchr::memchr;

/// One link in the chain: a payload and the absolute offset of its first byte.
#[derive(Debug, Clone)]
struct Segment {
    start: u64,
    data: Bytes,
}

/// An ordered chain of byte segments viewed as one logical byte run.
///
/// Invariants: segment start offsets are strictly increasing, adjacent
/// segments cover adjacent offsets, and no segment is empty.
#[derive(Debug, Clone, Default)]
pub struct ByteSequence {
    origin: u64,
    len: u64,
    segments: Vec<Segment>,
}

impl ByteSequence {
    /// An empty sequence starting at offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty sequence whose first appended byte will sit at `origin`.
    pub fn with_start(origin: u64) -> Self {
        Self {
            origin,
            len: 0,
            segments: Vec::new(),
        }
    }

    /// A single-segment sequence starting at offset zero.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let mut seq = Self::new();
        seq.append(data.into());
        seq
    }

    /// Links `data` at the chain tail. Empty buffers are ignored.
    pub fn append(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let start = self.origin + self.len;
        self.len += data.len() as u64;
        self.segments.push(Segment { start, data });
    }

    /// Absolute offset of the first byte.
    #[inline]
    pub fn start_index(&self) -> u64 {
        self.origin
    }

    /// Absolute offset one past the last byte.
    #[inline]
    pub fn end_index(&self) -> u64 {
        self.origin + self.len
    }

    /// Total byte count.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the sequence holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments in the chain.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Iterates the raw segment payloads in order (for vectored writes).
    pub fn segments(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter().map(|s| &s.data)
    }

    /// Index of the segment covering `pos`, with the offset inside it.
    fn locate(&self, pos: u64) -> Option<(usize, usize)> {
        if pos < self.origin || pos >= self.end_index() {
            return None;
        }
        let idx = self
            .segments
            .partition_point(|s| s.start + s.data.len() as u64 <= pos);
        let seg = &self.segments[idx];
        Some((idx, (pos - seg.start) as usize))
    }

    /// Reads the byte at an absolute position, or `None` if out of range.
    pub fn value_at(&self, pos: u64) -> Option<u8> {
        let (idx, off) = self.locate(pos)?;
        Some(self.segments[idx].data[off])
    }

    /// A sub-sequence view of `[start, end)`. O(number of spanned segments).
    ///
    /// # Panics
    ///
    /// Panics if the range is inverted or outside the sequence bounds.
    pub fn slice(&self, start: u64, end: u64) -> ByteSequence {
        assert!(
            start >= self.origin && end <= self.end_index() && start <= end,
            "slice [{start}, {end}) outside sequence [{}, {})",
            self.origin,
            self.end_index()
        );
        let mut out = ByteSequence::with_start(start);
        if start == end {
            return out;
        }
        let (first, off) = match self.locate(start) {
            Some(loc) => loc,
            None => return out,
        };
        let mut remaining = (end - start) as usize;
        let mut off = off;
        for seg in &self.segments[first..] {
            let take = remaining.min(seg.data.len() - off);
            out.append(seg.data.slice(off..off + take));
            remaining -= take;
            off = 0;
            if remaining == 0 {
                break;
            }
        }
        out
    }

    /// Finds the first CRLF at or after `from`, returning the absolute offset
    /// of the `\r`. A `\r` on a segment boundary with the `\n` in the next
    /// segment is found.
    pub fn find_crlf(&self, from: u64) -> Option<u64> {
        let (mut idx, mut off) = self.locate(from)?;
        while idx < self.segments.len() {
            let seg = &self.segments[idx];
            let mut search = off;
            while let Some(rel) = memchr(b'\r', &seg.data[search..]) {
                let cr = search + rel;
                let next = if cr + 1 < seg.data.len() {
                    Some(seg.data[cr + 1])
                } else {
                    self.segments.get(idx + 1).map(|s| s.data[0])
                };
                if next == Some(b'\n') {
                    return Some(seg.start + cr as u64);
                }
                search = cr + 1;
            }
            idx += 1;
            off = 0;
        }
        None
    }

    /// Iterates the bytes of `[start, end)` across segment boundaries.
    pub fn bytes_range(&self, start: u64, end: u64) -> impl Iterator<Item = u8> + '_ {
        let first = self.locate(start);
        let count = end.saturating_sub(start) as usize;
        let segments = &self.segments;
        first
            .into_iter()
            .flat_map(move |(idx, off)| {
                segments[idx..]
                    .iter()
                    .enumerate()
                    .flat_map(move |(i, seg)| {
                        let skip = if i == 0 { off } else { 0 };
                        seg.data[skip..].iter().copied()
                    })
            })
            .take(count)
    }

    /// The whole sequence as one `Bytes`. Zero-copy when the chain has a
    /// single segment; otherwise the segments are concatenated.
    pub fn to_bytes(&self) -> Bytes {
        match self.segments.len() {
            0 => Bytes::new(),
            1 => self.segments[0].data.clone(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len as usize);
                for seg in &self.segments {
                    buf.extend_from_slice(&seg.data);
                }
                buf.freeze()
            }
        }
    }

    /// Copies the sequence into a `Vec` (test and diagnostic helper).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len as usize);
        for seg in &self.segments {
            out.extend_from_slice(&seg.data);
        }
        out
    }
}

/// A forward-only cursor over a [`ByteSequence`].
///
/// The decoder peeks through the reader and only moves the position once a
/// whole token has been recognized, so a partial input leaves the cursor
/// where it was.
#[derive(Debug)]
pub struct SeqReader<'a> {
    seq: &'a ByteSequence,
    pos: u64,
}

impl<'a> SeqReader<'a> {
    /// A cursor positioned at the start of `seq`.
    pub fn new(seq: &'a ByteSequence) -> Self {
        Self {
            seq,
            pos: seq.start_index(),
        }
    }

    /// The underlying sequence.
    #[inline]
    pub fn sequence(&self) -> &'a ByteSequence {
        self.seq
    }

    /// Current absolute position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes left between the position and the end of the sequence.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.seq.end_index() - self.pos
    }

    /// The byte at the current position, without advancing.
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.seq.value_at(self.pos)
    }

    /// Moves the cursor forward to an absolute position.
    ///
    /// # Panics
    ///
    /// Panics if `pos` moves backwards or past the end of the sequence.
    pub fn advance_to(&mut self, pos: u64) {
        assert!(
            pos >= self.pos && pos <= self.seq.end_index(),
            "advance_to({pos}) outside [{}, {}]",
            self.pos,
            self.seq.end_index()
        );
        self.pos = pos;
    }

    /// First CRLF at or after the current position.
    #[inline]
    pub fn find_crlf(&self, from: u64) -> Option<u64> {
        self.seq.find_crlf(from)
    }

    /// The sub-sequence from the sequence start up to the current position.
    pub fn consumed_prefix(&self) -> ByteSequence {
        self.seq.slice(self.seq.start_index(), self.pos)
    }
}
