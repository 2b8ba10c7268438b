//! The connection runtime: configuration, a single pooled connection with
//! its two I/O pumps, reply assembly, and the named bounded pool.

mod config;
mod connection;
mod pool;
mod reply;

pub use config::{ConnectConfig, Endpoint};
pub use connection::{Connection, ConnectionStatus};
pub use pool::{Pool, PoolRegistry, PoolStats, PooledConnection};
pub use reply::Reply;
