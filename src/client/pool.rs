//! Named, bounded connection pools.
//!
//! A pool couples a semaphore (capacity `max_pool_size`, FIFO waiters) with
//! a lock-free queue of idle connections. Renting takes a permit and an idle
//! connection if one exists, otherwise a fresh unconnected one; the rental
//! guard returns reusable connections on drop and discards poisoned ones.
//! At any moment `outstanding rentals + idle connections <= max_pool_size`.

use crate::client::config::ConnectConfig;
use crate::client::connection::Connection;
use crate::error::{Error, Result};
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Counters for pool monitoring.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Successful rentals.
    pub rentals: AtomicU64,
    /// Rentals served from the idle queue.
    pub reuses: AtomicU64,
    /// Rentals that created a fresh connection.
    pub creates: AtomicU64,
    /// Connections discarded on return instead of re-queued.
    pub discards: AtomicU64,
    /// Rentals that timed out waiting for a permit.
    pub timeouts: AtomicU64,
}

/// Registry of pools keyed by configuration name.
///
/// The first `pool(name, config)` call for a name validates and freezes the
/// configuration and creates the pool; later calls return the existing pool
/// and ignore the passed configuration. Creation is idempotent under
/// concurrent first use.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: DashMap<String, Pool>,
}

impl PoolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool named `name`, created from `config` on first use.
    pub fn pool(&self, name: &str, config: ConnectConfig) -> Result<Pool> {
        use dashmap::mapref::entry::Entry;
        match self.pools.entry(name.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                config.validate()?;
                config.freeze();
                debug!(name, max = config.max_pool_size, "creating pool");
                let pool = Pool::new(name.to_string(), config);
                slot.insert(pool.clone());
                Ok(pool)
            }
        }
    }

    /// An already-created pool, if any.
    pub fn get(&self, name: &str) -> Option<Pool> {
        self.pools.get(name).map(|entry| entry.value().clone())
    }
}

/// A bounded multiset of connections sharing one frozen configuration.
///
/// `Pool` is a cheap clone-able handle; clones share the same permits, idle
/// queue, and counters.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    config: Arc<ConnectConfig>,
    permits: Arc<Semaphore>,
    idle: ArrayQueue<Connection>,
    next_id: AtomicU64,
    stats: PoolStats,
}

impl Pool {
    fn new(name: String, config: ConnectConfig) -> Self {
        let max = config.max_pool_size;
        Self {
            inner: Arc::new(PoolInner {
                name,
                config: Arc::new(config),
                permits: Arc::new(Semaphore::new(max)),
                idle: ArrayQueue::new(max),
                next_id: AtomicU64::new(1),
                stats: PoolStats::default(),
            }),
        }
    }

    /// The pool's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The frozen configuration shared by every connection in the pool.
    pub fn config(&self) -> &Arc<ConnectConfig> {
        &self.inner.config
    }

    /// Pool capacity.
    pub fn max_size(&self) -> usize {
        self.inner.config.max_pool_size
    }

    /// Currently idle connections.
    pub fn idle_len(&self) -> usize {
        self.inner.idle.len()
    }

    /// Rental counters.
    pub fn stats(&self) -> &PoolStats {
        &self.inner.stats
    }

    /// Rents a connection, waiting at most `timeout` behind earlier callers.
    ///
    /// Waiters are served FIFO. A fresh connection is returned unconnected
    /// and connects lazily on first use.
    pub async fn rent(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<PooledConnection> {
        let inner = &self.inner;
        let permit = tokio::select! {
            _ = token.cancelled() => return Err(Error::Canceled),
            acquired = tokio::time::timeout(timeout, inner.permits.clone().acquire_owned()) => {
                match acquired {
                    Err(_elapsed) => {
                        inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::PoolTimeout);
                    }
                    Ok(result) => result.expect("pool semaphore is never closed"),
                }
            }
        };

        let connection = match inner.idle.pop() {
            Some(conn) => {
                inner.stats.reuses.fetch_add(1, Ordering::Relaxed);
                trace!(pool = %inner.name, id = conn.id(), "reusing idle connection");
                conn
            }
            None => {
                let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                inner.stats.creates.fetch_add(1, Ordering::Relaxed);
                trace!(pool = %inner.name, id, "creating connection");
                Connection::new(id, inner.config.clone())
            }
        };
        inner.stats.rentals.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            connection: Some(connection),
            pool: self.clone(),
            _permit: permit,
        })
    }
}

impl PoolInner {
    /// Re-queues or discards a returned connection.
    fn give_back(&self, connection: Connection) {
        if connection.is_reusable() {
            trace!(pool = %self.name, id = connection.id(), "returning connection to idle queue");
            // The queue has one slot per permit, so this cannot overflow
            // while rentals are balanced; a race loser is just dropped.
            if let Err(conn) = self.idle.push(connection) {
                drop(conn);
            }
        } else {
            self.stats.discards.fetch_add(1, Ordering::Relaxed);
            debug!(pool = %self.name, id = connection.id(), status = %connection.status(), "discarding connection");
        }
    }
}

/// An exclusive loan of a pooled connection.
///
/// Dereferences to [`Connection`]. On drop the connection is returned to the
/// pool if it is still usable, discarded otherwise; the pool slot is freed
/// either way.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Pool,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("connection already returned")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().expect("connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.inner.give_back(connection);
        }
        // _permit drops after, releasing the slot.
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.inner.name)
            .field("connection", &self.connection)
            .finish()
    }
}
