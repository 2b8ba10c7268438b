//! # Remora
//!
//! An asynchronous client runtime for the Redis server protocol.
//!
//! Remora provides the plumbing a Redis client needs and nothing else:
//! - An incremental, zero-copy RESP2/RESP3 decoder that handles arbitrarily
//!   fragmented input
//! - A forward-only RESP encoder with optional structural validation
//! - A per-connection full-duplex I/O loop built on two in-memory byte pipes
//! - Named, bounded connection pools with fair FIFO rental and
//!   return-on-drop
//!
//! It is deliberately not a command library: the only primitives exposed are
//! "issue an arbitrary command" and "read an arbitrary reply".
//!
//! ## Example
//!
//! ```no_run
//! use remora::{ConnectConfig, PoolRegistry, Result};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let registry = PoolRegistry::new();
//!     let config: ConnectConfig = "127.0.0.1:6379,MaxPoolSize=8".parse()?;
//!     let pool = registry.pool("cache", config)?;
//!
//!     let token = CancellationToken::new();
//!     let mut conn = pool.rent(Duration::from_secs(5), &token).await?;
//!     let reply = conn.issue(&[b"PING"], &token).await?;
//!     println!("{reply:?}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]
#![allow(clippy::module_name_repetitions)]

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Segmented byte sequences and the SPSC byte pipe.
pub mod buffer;
/// Connection, configuration, pooling, and reply assembly.
pub mod client;
/// Error types and result alias.
pub mod error;
/// RESP2/RESP3 encoding and incremental decoding.
pub mod protocol;

// ─────────────────────────────────────────────────────────────────────────────
// Common Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use buffer::{pipe, ByteSequence, PipeReader, PipeWriter, SeqReader};
pub use client::{
    ConnectConfig, Connection, ConnectionStatus, Endpoint, Pool, PoolRegistry, PooledConnection,
    Reply,
};
pub use error::{EncodeError, Error, ProtocolError, Result};
pub use protocol::{ProtocolVersion, RespReader, RespWriter, Token, TokenKind};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Redis server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Maximum bulk string payload size (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;
