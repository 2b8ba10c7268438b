//! Byte-sequence plumbing shared by the codec and the connection runtime.
//!
//! [`ByteSequence`] is a chain of reference-counted byte segments forming one
//! logical contiguous stream, so the decoder can slice values that straddle
//! I/O buffers without copying. [`pipe`] builds a bounded single-producer /
//! single-consumer byte queue out of such sequences.

mod pipe;
mod segment;

pub use pipe::{pipe, pipe_with_capacity, FlushResult, PipeReader, PipeWriter, ReadResult};
pub use segment::{ByteSequence, SeqReader};
