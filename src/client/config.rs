//! Connection configuration.
//!
//! A [`ConnectConfig`] is built once, validated on first use by a pool, and
//! frozen from then on: every connection in a pool shares the same record by
//! reference. The connection-string form is a comma-separated list of
//! `host:port` endpoints and case-insensitive `Key=value` items.

use crate::error::Error;
use crate::protocol::ProtocolVersion;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default upper bound on connections per pool.
pub const DEFAULT_MAX_POOL_SIZE: usize = 20;

/// A host (name or IP literal) plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal. Names are re-resolved on every connect.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("endpoint `{s}` is missing a port")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::Config(format!("invalid port in endpoint `{s}`")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("endpoint `{s}` is missing a host")));
        }
        Ok(Endpoint::new(host, port))
    }
}

/// Validated, freeze-on-first-use connection options.
#[derive(Debug)]
pub struct ConnectConfig {
    /// Primary server endpoint.
    pub endpoint: Endpoint,
    /// Further endpoints from the connection string. Parsed and preserved;
    /// not used for connection placement.
    pub extra_endpoints: Vec<Endpoint>,
    /// Username for the handshake `AUTH`. Defaults to `default` when only a
    /// password is set.
    pub username: Option<String>,
    /// Password for the handshake `AUTH`.
    pub password: Option<String>,
    /// Client name sent as `SETNAME` in the handshake.
    pub client_name: Option<String>,
    /// Apply `TCP_NODELAY` to new sockets.
    pub no_delay: bool,
    /// Wait for socket readability before taking receive-buffer memory.
    pub allocate_receive_buffer_on_demand: bool,
    /// Upper bound on connections per pool.
    pub max_pool_size: usize,
    /// Protocol version to negotiate. `Unknown` lets the handshake decide.
    pub protocol: ProtocolVersion,
    /// `Key=value` items this version does not understand, preserved as-is.
    pub unknown_items: Vec<(String, String)>,
    frozen: AtomicBool,
}

impl ConnectConfig {
    /// Options for a single endpoint with all defaults.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            extra_endpoints: Vec::new(),
            username: None,
            password: None,
            client_name: None,
            no_delay: true,
            allocate_receive_buffer_on_demand: true,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            protocol: ProtocolVersion::Unknown,
            unknown_items: Vec::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Set the credentials sent during the handshake. Fails once the record
    /// is frozen.
    pub fn with_credentials(
        mut self,
        username: impl Into<Option<String>>,
        password: impl Into<String>,
    ) -> Result<Self, Error> {
        self.guard_unfrozen("with_credentials")?;
        self.username = username.into();
        self.password = Some(password.into());
        Ok(self)
    }

    /// Set the client name announced via `SETNAME`. Fails once the record is
    /// frozen.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Result<Self, Error> {
        self.guard_unfrozen("with_client_name")?;
        self.client_name = Some(name.into());
        Ok(self)
    }

    /// Set the pool capacity. Fails once the record is frozen.
    pub fn with_max_pool_size(mut self, max: usize) -> Result<Self, Error> {
        self.guard_unfrozen("with_max_pool_size")?;
        self.max_pool_size = max;
        Ok(self)
    }

    /// Enable or disable `TCP_NODELAY`. Fails once the record is frozen.
    pub fn with_no_delay(mut self, enabled: bool) -> Result<Self, Error> {
        self.guard_unfrozen("with_no_delay")?;
        self.no_delay = enabled;
        Ok(self)
    }

    /// Pin the protocol version instead of negotiating. Fails once the
    /// record is frozen.
    pub fn with_protocol(mut self, version: ProtocolVersion) -> Result<Self, Error> {
        self.guard_unfrozen("with_protocol")?;
        self.protocol = version;
        Ok(self)
    }

    /// Editing a record a pool has taken into use is a programming error.
    fn guard_unfrozen(&self, operation: &'static str) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::InvalidState {
                operation,
                status: "frozen",
            });
        }
        Ok(())
    }

    /// Checks the record for use by a pool.
    pub fn validate(&self) -> Result<(), Error> {
        if self.endpoint.host.is_empty() {
            return Err(Error::Config("endpoint host is empty".to_string()));
        }
        if self.endpoint.port == 0 {
            return Err(Error::Config("endpoint port is zero".to_string()));
        }
        if self.max_pool_size == 0 {
            return Err(Error::Config("max_pool_size must be at least 1".to_string()));
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(Error::Config(
                "a username requires a password".to_string(),
            ));
        }
        Ok(())
    }

    /// Marks the record as in use. Frozen records are shared by reference
    /// and never mutated.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether the record has been taken into use by a pool.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

impl Clone for ConnectConfig {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            extra_endpoints: self.extra_endpoints.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            client_name: self.client_name.clone(),
            no_delay: self.no_delay,
            allocate_receive_buffer_on_demand: self.allocate_receive_buffer_on_demand,
            max_pool_size: self.max_pool_size,
            protocol: self.protocol,
            unknown_items: self.unknown_items.clone(),
            // A copy is a fresh, editable record.
            frozen: AtomicBool::new(false),
        }
    }
}

impl FromStr for ConnectConfig {
    type Err = Error;

    /// Parses the comma-separated connection-string form, e.g.
    /// `redis1.example:6379,redis2.example:6379,MaxPoolSize=50`.
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut endpoints: Vec<Endpoint> = Vec::new();
        let mut max_pool_size: Option<usize> = None;
        let mut unknown_items: Vec<(String, String)> = Vec::new();

        for item in s.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if let Some((key, value)) = item.split_once('=') {
                if key.eq_ignore_ascii_case("maxpoolsize") {
                    let size: usize = value.parse().map_err(|_| {
                        Error::Config(format!("invalid MaxPoolSize value `{value}`"))
                    })?;
                    max_pool_size = Some(size);
                } else {
                    tracing::warn!(key, value, "unknown connection string item");
                    unknown_items.push((key.to_string(), value.to_string()));
                }
            } else {
                endpoints.push(item.parse()?);
            }
        }

        let mut endpoints = endpoints.into_iter();
        let primary = endpoints
            .next()
            .ok_or_else(|| Error::Config("connection string has no endpoint".to_string()))?;

        let mut config = ConnectConfig::new(primary);
        config.extra_endpoints = endpoints.collect();
        config.unknown_items = unknown_items;
        if let Some(size) = max_pool_size {
            config.max_pool_size = size;
        }
        Ok(config)
    }
}
