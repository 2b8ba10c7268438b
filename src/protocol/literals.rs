//! Pre-encoded RESP request literals.
//!
//! The handshake frames never change, so they are kept as static bytes and
//! appended with `write_raw` instead of being re-encoded per connection.

/// `PING` as a complete RESP array.
pub static PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// `HELLO 3` as a complete RESP array (no credentials, no client name).
pub static HELLO_3: &[u8] = b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n";

/// The `HELLO` command name.
pub static CMD_HELLO: &[u8] = b"HELLO";

/// The `AUTH` keyword (both the HELLO argument and the RESP2 command).
pub static CMD_AUTH: &[u8] = b"AUTH";

/// The `SETNAME` HELLO argument keyword.
pub static CMD_SETNAME: &[u8] = b"SETNAME";

/// The `PING` command name.
pub static CMD_PING: &[u8] = b"PING";

/// The protocol version argument sent with `HELLO`.
pub static PROTO_3: &[u8] = b"3";
