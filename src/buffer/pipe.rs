//! Bounded single-producer / single-consumer byte pipe.
//!
//! The writer stages bytes in private memory (`get_memory` / `advance`) and
//! publishes them with an async `flush` that suspends while the pipe is at
//! capacity. The reader gets a stable [`ByteSequence`] view of everything
//! published and releases it with `advance_to`. Either side can cancel, which
//! unblocks the other with the corresponding flag set.
//!
//! Running indices are absolute stream offsets: the first byte ever written
//! is offset 0, and `advance_to` takes the same offsets the read view
//! reports. Segments are reference-counted, so a view handed out by `read`
//! stays valid even after the bytes are released.

use crate::buffer::ByteSequence;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Default cap on flushed-but-unread bytes before `flush` suspends.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Outcome of a writer flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// The pipe was canceled by either side.
    pub is_canceled: bool,
    /// The reader side is gone; further writes will never be observed.
    pub is_completed: bool,
}

/// Outcome of a reader read.
#[derive(Debug)]
pub struct ReadResult {
    /// All currently readable bytes. Stable until `advance_to`.
    pub buffer: ByteSequence,
    /// The writer completed; once `buffer` is drained no more bytes follow.
    pub is_completed: bool,
    /// The pipe was canceled by either side.
    pub is_canceled: bool,
}

struct State {
    segments: VecDeque<Bytes>,
    /// Absolute offset of the first unreleased byte.
    base: u64,
    /// Flushed, unreleased byte count.
    buffered: usize,
    write_closed: bool,
    read_closed: bool,
    canceled: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    /// Signaled when the reader releases bytes or goes away.
    space: Notify,
    /// Signaled when the writer publishes bytes, completes, or cancels.
    data: Notify,
}

/// Creates a pipe with the default capacity.
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_capacity(DEFAULT_PIPE_CAPACITY)
}

/// Creates a pipe that suspends `flush` once `capacity` flushed bytes are
/// pending. The capacity must admit the largest item the consumer needs to
/// see whole, or producer and consumer deadlock.
pub fn pipe_with_capacity(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            segments: VecDeque::new(),
            base: 0,
            buffered: 0,
            write_closed: false,
            read_closed: false,
            canceled: false,
        }),
        capacity,
        space: Notify::new(),
        data: Notify::new(),
    });
    (
        PipeWriter {
            shared: shared.clone(),
            staging: BytesMut::new(),
            committed: 0,
        },
        PipeReader { shared },
    )
}

/// The producing half of a pipe.
pub struct PipeWriter {
    shared: Arc<Shared>,
    staging: BytesMut,
    committed: usize,
}

impl PipeWriter {
    /// Returns at least `min` bytes of writable memory. The region starts at
    /// the first un-advanced byte, so repeated calls see the same staged
    /// prefix until `flush`.
    pub fn get_memory(&mut self, min: usize) -> &mut [u8] {
        let need = self.committed + min.max(1);
        if self.staging.len() < need {
            self.staging.resize(need, 0);
        }
        &mut self.staging[self.committed..]
    }

    /// Commits `n` staged bytes as ready to publish.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the memory handed out by `get_memory`.
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.committed + n <= self.staging.len(),
            "advance({n}) past the staged region"
        );
        self.committed += n;
    }

    /// Bytes advanced but not yet flushed.
    #[inline]
    pub fn pending(&self) -> usize {
        self.committed
    }

    /// Publishes advanced bytes to the reader, then waits until the pipe has
    /// room for more. Returns immediately with the flags set if the pipe was
    /// canceled or the reader is gone.
    pub async fn flush(&mut self) -> FlushResult {
        let seg = self.staging.split_to(self.committed).freeze();
        self.committed = 0;
        if !seg.is_empty() {
            let mut st = self.shared.state.lock();
            st.buffered += seg.len();
            st.segments.push_back(seg);
            drop(st);
            self.shared.data.notify_one();
        }
        loop {
            {
                let st = self.shared.state.lock();
                if st.canceled || st.read_closed || st.buffered < self.shared.capacity {
                    return FlushResult {
                        is_canceled: st.canceled,
                        is_completed: st.read_closed,
                    };
                }
            }
            self.shared.space.notified().await;
        }
    }

    /// Marks the write side closed. The reader drains what was flushed and
    /// then observes `is_completed`.
    pub fn complete(&mut self) {
        self.shared.state.lock().write_closed = true;
        self.shared.data.notify_one();
    }

    /// Cancels the pipe, unblocking both sides with `is_canceled` set.
    pub fn cancel(&self) {
        cancel_shared(&self.shared);
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.state.lock().write_closed = true;
        self.shared.data.notify_one();
    }
}

/// The consuming half of a pipe.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Waits for readable bytes and returns a stable view over all of them.
    /// Successive calls return the same view until [`advance_to`] releases a
    /// prefix.
    ///
    /// [`advance_to`]: PipeReader::advance_to
    pub async fn read(&mut self) -> ReadResult {
        self.read_past(0).await
    }

    /// Like [`read`], but only returns once the readable region extends past
    /// the absolute offset `floor` (or the pipe completed or canceled).
    /// Lets an incremental parser that has seen everything up to `floor`
    /// sleep until genuinely new bytes arrive.
    ///
    /// [`read`]: PipeReader::read
    pub async fn read_past(&mut self, floor: u64) -> ReadResult {
        loop {
            {
                let st = self.shared.state.lock();
                let end = st.base + st.buffered as u64;
                if (st.buffered > 0 && end > floor) || st.write_closed || st.canceled {
                    let mut seq = ByteSequence::with_start(st.base);
                    for seg in &st.segments {
                        seq.append(seg.clone());
                    }
                    return ReadResult {
                        buffer: seq,
                        is_completed: st.write_closed,
                        is_canceled: st.canceled,
                    };
                }
            }
            self.shared.data.notified().await;
        }
    }

    /// Releases bytes before the absolute offset `pos`, reclaiming pipe
    /// capacity and waking a writer blocked in `flush`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is behind a previous release or ahead of the readable
    /// region.
    pub fn advance_to(&mut self, pos: u64) {
        let mut guard = self.shared.state.lock();
        let st = &mut *guard;
        let end = st.base + st.buffered as u64;
        assert!(
            pos >= st.base && pos <= end,
            "advance_to({pos}) outside readable region [{}, {end}]",
            st.base
        );
        while let Some(front) = st.segments.front_mut() {
            let seg_end = st.base + front.len() as u64;
            if seg_end <= pos {
                let released = front.len();
                st.segments.pop_front();
                st.base += released as u64;
                st.buffered -= released;
            } else {
                let within = (pos - st.base) as usize;
                if within > 0 {
                    *front = front.slice(within..);
                    st.base = pos;
                    st.buffered -= within;
                }
                break;
            }
        }
        drop(guard);
        self.shared.space.notify_one();
    }

    /// Cancels the pipe, unblocking both sides with `is_canceled` set.
    pub fn cancel(&self) {
        cancel_shared(&self.shared);
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.state.lock().read_closed = true;
        self.shared.space.notify_one();
    }
}

fn cancel_shared(shared: &Shared) {
    shared.state.lock().canceled = true;
    shared.space.notify_one();
    shared.data.notify_one();
}
