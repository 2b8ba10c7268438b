//! A single client connection: one TCP socket, two byte pipes, two pumps.
//!
//! The command path never touches the socket. It encodes into the send pipe
//! and decodes out of the receive pipe; the pumps shuttle bytes between the
//! pipes and the socket halves as independent tasks. Any pump failure
//! poisons the connection: `Failed` is terminal and the pool discards the
//! connection instead of recycling it.

use crate::buffer::{pipe_with_capacity, PipeReader, PipeWriter, SeqReader};
use crate::client::config::ConnectConfig;
use crate::client::reply::{split_verbatim, Reply};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{
    signed_integer, ProtocolVersion, RespReader, RespWriter, Token, TokenKind, CMD_AUTH,
    CMD_HELLO, CMD_SETNAME, HELLO_3, PING, PROTO_3,
};
use crate::MAX_BULK_SIZE;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, IoSlice};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Receive-buffer chunk requested from the receive pipe per socket read.
const RECV_CHUNK: usize = 4 * 1024;

/// Send pipe capacity: callers queueing faster than the socket drains are
/// suspended past this.
const SEND_PIPE_CAPACITY: usize = 64 * 1024;

/// Receive pipe capacity. Reply decoding commits on whole-token boundaries,
/// so the pipe must be able to buffer the largest legal token.
const RECV_PIPE_CAPACITY: usize = MAX_BULK_SIZE + RECV_CHUNK;

/// Connect timeout applied when a pooled connection lazily connects.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Created, never connected.
    New,
    /// Resolving and opening the socket.
    Connecting,
    /// Socket open, HELLO in flight.
    Handshaking,
    /// Idle and usable.
    Ready,
    /// A command is in flight.
    Busy,
    /// Poisoned. Terminal (except for disposal).
    Failed,
    /// Disposed.
    Closed,
}

impl ConnectionStatus {
    /// Status name for diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Connecting => "Connecting",
            Self::Handshaking => "Handshaking",
            Self::Ready => "Ready",
            Self::Busy => "Busy",
            Self::Failed => "Failed",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared status slot. The pumps mark failures from their own tasks; the
/// command path reads and transitions through the same cell.
#[derive(Debug)]
struct StatusCell(Mutex<ConnectionStatus>);

impl StatusCell {
    fn new() -> Self {
        Self(Mutex::new(ConnectionStatus::New))
    }

    fn get(&self) -> ConnectionStatus {
        *self.0.lock()
    }

    /// Transitions to `next`. `Failed` and `Closed` are sticky: only
    /// disposal moves a failed connection, and nothing moves a closed one.
    fn set(&self, next: ConnectionStatus) {
        let mut slot = self.0.lock();
        match *slot {
            ConnectionStatus::Closed => {}
            ConnectionStatus::Failed if next != ConnectionStatus::Closed => {}
            _ => *slot = next,
        }
    }

    fn mark_failed(&self) {
        self.set(ConnectionStatus::Failed);
    }
}

fn invalid_state(operation: &'static str, status: ConnectionStatus) -> Error {
    Error::InvalidState {
        operation,
        status: status.as_str(),
    }
}

/// Live I/O attached to a connected connection.
struct Io {
    /// Command path → send pump.
    send: PipeWriter,
    /// Receive pump → command path.
    recv: PipeReader,
    /// Incremental reply decoder. Survives across commands.
    decoder: RespReader,
    send_pump: JoinHandle<()>,
    recv_pump: JoinHandle<()>,
}

impl Io {
    fn shutdown(&self) {
        self.send.cancel();
        self.recv.cancel();
        self.send_pump.abort();
        self.recv_pump.abort();
    }
}

/// One client connection with exclusive single-command use.
///
/// Connections are usually rented from a [`Pool`](crate::client::Pool) and
/// connect lazily on first use. Commands are single-outstanding per
/// connection; concurrency comes from renting more connections.
pub struct Connection {
    id: u64,
    config: Arc<ConnectConfig>,
    status: Arc<StatusCell>,
    protocol: ProtocolVersion,
    io: Option<Io>,
}

impl Connection {
    /// A new, unconnected connection.
    pub fn new(id: u64, config: Arc<ConnectConfig>) -> Self {
        Self {
            id,
            config,
            status: Arc::new(StatusCell::new()),
            // Even a pinned Resp3 is a request until HELLO confirms it.
            protocol: ProtocolVersion::Unknown,
            io: None,
        }
    }

    /// Opaque connection id (unique within its pool).
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Negotiated protocol version, `Unknown` before the handshake.
    #[inline]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol
    }

    /// True if the pool may hand this connection to another caller.
    pub(crate) fn is_reusable(&self) -> bool {
        matches!(
            self.status.get(),
            ConnectionStatus::New | ConnectionStatus::Ready
        )
    }

    /// Resolves the endpoint, opens the socket, starts the pumps, and
    /// performs the handshake. The endpoint is re-resolved on every call so
    /// DNS changes are picked up.
    pub async fn connect(&mut self, deadline: Duration, token: &CancellationToken) -> Result<()> {
        match self.status.get() {
            ConnectionStatus::New => {}
            status => return Err(invalid_state("connect", status)),
        }
        self.status.set(ConnectionStatus::Connecting);
        let endpoint = self.config.endpoint.clone();
        debug!(id = self.id, endpoint = %endpoint, "connecting");

        let open = tokio::time::timeout(deadline, async {
            let mut addrs = lookup_host((endpoint.host.as_str(), endpoint.port)).await?;
            let addr = addrs.next().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for {}", endpoint.host),
                )
            })?;
            TcpStream::connect(addr).await
        });

        let stream = tokio::select! {
            _ = token.cancelled() => {
                self.status.mark_failed();
                return Err(Error::Canceled);
            }
            opened = open => match opened {
                Err(_elapsed) => {
                    self.status.mark_failed();
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect deadline elapsed",
                    )));
                }
                Ok(Err(e)) => {
                    self.status.mark_failed();
                    return Err(e.into());
                }
                Ok(Ok(stream)) => stream,
            },
        };

        if let Err(e) = stream.set_nodelay(self.config.no_delay) {
            self.status.mark_failed();
            return Err(e.into());
        }

        let (read_half, write_half) = stream.into_split();
        let (send_writer, send_reader) = pipe_with_capacity(SEND_PIPE_CAPACITY);
        let (recv_writer, recv_reader) = pipe_with_capacity(RECV_PIPE_CAPACITY);

        let send_pump = tokio::spawn(run_send_pump(
            send_reader,
            write_half,
            self.status.clone(),
            self.id,
        ));
        let recv_pump = tokio::spawn(run_recv_pump(
            recv_writer,
            read_half,
            self.status.clone(),
            self.config.allocate_receive_buffer_on_demand,
            self.id,
        ));

        self.io = Some(Io {
            send: send_writer,
            recv: recv_reader,
            decoder: RespReader::new(),
            send_pump,
            recv_pump,
        });

        self.status.set(ConnectionStatus::Handshaking);
        match self.handshake(token).await {
            Ok(version) => {
                self.protocol = version;
                self.status.set(ConnectionStatus::Ready);
                debug!(id = self.id, protocol = ?version, "connection ready");
                Ok(())
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Issues one command and reads one complete reply.
    ///
    /// `args` is the command name followed by its arguments, each encoded as
    /// a bulk string. Lazily connects when the connection is still `New`.
    pub async fn issue(&mut self, args: &[&[u8]], token: &CancellationToken) -> Result<Reply> {
        if args.is_empty() {
            return Err(Error::ArgumentOutOfRange(
                "a command needs at least one argument".to_string(),
            ));
        }
        if self.status.get() == ConnectionStatus::New {
            self.connect(DEFAULT_CONNECT_TIMEOUT, token).await?;
        }
        match self.status.get() {
            ConnectionStatus::Ready => {}
            ConnectionStatus::Failed => return Err(Error::ConnectionBroken),
            status => return Err(invalid_state("issue", status)),
        }
        // Nothing sent yet: a cancellation here aborts with the connection
        // still clean.
        if token.is_cancelled() {
            return Err(Error::Canceled);
        }

        self.status.set(ConnectionStatus::Busy);
        trace!(id = self.id, argc = args.len(), "issuing command");
        let result = self.exchange(args, token).await;
        match result {
            Ok(reply) => {
                self.status.set(ConnectionStatus::Ready);
                Ok(reply)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Closes the connection: cancels both pumps and releases the socket.
    pub fn dispose(&mut self) {
        if let Some(io) = self.io.take() {
            io.shutdown();
            debug!(id = self.id, "connection disposed");
        }
        self.status.set(ConnectionStatus::Closed);
    }

    fn fail(&mut self) {
        self.status.mark_failed();
        if let Some(io) = &self.io {
            io.shutdown();
        }
    }

    async fn exchange(&mut self, args: &[&[u8]], token: &CancellationToken) -> Result<Reply> {
        let io = self.io.as_mut().ok_or(Error::ConnectionBroken)?;
        {
            let mut enc = RespWriter::new(&mut io.send);
            enc.write_command(args)?;
            enc.flush();
        }
        flush_send(io, token).await?;
        read_reply(io, token).await
    }

    /// Negotiates the protocol version, authenticating if configured.
    async fn handshake(&mut self, token: &CancellationToken) -> Result<ProtocolVersion> {
        let config = self.config.clone();
        let io = self.io.as_mut().ok_or(Error::ConnectionBroken)?;

        if config.protocol != ProtocolVersion::Resp2 {
            send_hello(io, &config)?;
            flush_send(io, token).await?;
            match read_reply(io, token).await?.into_value() {
                Reply::Map(_) => return Ok(ProtocolVersion::Resp3),
                // A pre-RESP3 server that knows HELLO answers with an array.
                Reply::Array(_) => return Ok(ProtocolVersion::Resp2),
                Reply::Error(message) => {
                    let text = String::from_utf8_lossy(&message).into_owned();
                    if !text.starts_with("NOPROTO") {
                        return Err(Error::Handshake {
                            server_message: Some(text),
                        });
                    }
                    debug!(id = self.id, "server lacks RESP3, retrying as RESP2");
                }
                _ => {
                    return Err(Error::Handshake {
                        server_message: None,
                    })
                }
            }
        }

        // RESP2 path: explicit AUTH, then a PING to prove the link.
        if let Some(password) = &config.password {
            let mut args: Vec<&[u8]> = vec![CMD_AUTH];
            if let Some(username) = &config.username {
                args.push(username.as_bytes());
            }
            args.push(password.as_bytes());
            {
                let mut enc = RespWriter::new(&mut io.send);
                enc.write_command(&args)?;
                enc.flush();
            }
            flush_send(io, token).await?;
            match read_reply(io, token).await?.into_value() {
                Reply::Simple(ok) if ok.as_ref() == b"OK" => {}
                Reply::Error(message) => {
                    return Err(Error::Handshake {
                        server_message: Some(String::from_utf8_lossy(&message).into_owned()),
                    })
                }
                _ => {
                    return Err(Error::Handshake {
                        server_message: None,
                    })
                }
            }
        }

        {
            let mut enc = RespWriter::new(&mut io.send);
            enc.write_raw(PING);
            enc.flush();
        }
        flush_send(io, token).await?;
        match read_reply(io, token).await?.into_value() {
            Reply::Simple(pong) if pong.as_ref() == b"PONG" => Ok(ProtocolVersion::Resp2),
            Reply::Error(message) => Err(Error::Handshake {
                server_message: Some(String::from_utf8_lossy(&message).into_owned()),
            }),
            _ => Err(Error::Handshake {
                server_message: None,
            }),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(io) = self.io.take() {
            io.shutdown();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.config.endpoint)
            .field("status", &self.status.get())
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// Writes the `HELLO 3` frame, with `AUTH` and `SETNAME` arguments when
/// configured.
fn send_hello(io: &mut Io, config: &ConnectConfig) -> Result<()> {
    let mut enc = RespWriter::new(&mut io.send);
    if config.password.is_none() && config.client_name.is_none() {
        enc.write_raw(HELLO_3);
    } else {
        let mut args: Vec<&[u8]> = vec![CMD_HELLO, PROTO_3];
        if let Some(password) = &config.password {
            args.push(CMD_AUTH);
            args.push(
                config
                    .username
                    .as_deref()
                    .map(str::as_bytes)
                    .unwrap_or(b"default"),
            );
            args.push(password.as_bytes());
        }
        if let Some(name) = &config.client_name {
            args.push(CMD_SETNAME);
            args.push(name.as_bytes());
        }
        enc.write_command(&args)?;
    }
    enc.flush();
    Ok(())
}

/// Publishes pending command bytes to the send pump.
async fn flush_send(io: &mut Io, token: &CancellationToken) -> Result<()> {
    let result = tokio::select! {
        _ = token.cancelled() => return Err(Error::Canceled),
        r = io.send.flush() => r,
    };
    if result.is_canceled || result.is_completed {
        return Err(Error::ConnectionBroken);
    }
    Ok(())
}

/// Waits for the next decodable token, whole-token-atomic: the receive pipe
/// is only advanced once a full token is recognized.
async fn next_token(
    io: &mut Io,
    token: &CancellationToken,
    bulk_length: Option<i64>,
) -> Result<Token> {
    let mut floor = 0u64;
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return Err(Error::Canceled),
            r = io.recv.read_past(floor) => r,
        };
        if result.is_canceled {
            return Err(Error::ConnectionBroken);
        }
        let buffer = result.buffer;
        let mut cursor = SeqReader::new(&buffer);
        let decoded = match bulk_length {
            Some(len) => io.decoder.try_read_bulk_string(&mut cursor, len)?,
            None => io.decoder.try_read(&mut cursor)?,
        };
        match decoded {
            Some(tok) => {
                io.recv.advance_to(cursor.position());
                return Ok(tok);
            }
            None if result.is_completed => return Err(Error::ConnectionBroken),
            None => floor = buffer.end_index(),
        }
    }
}

/// In-progress container while assembling a reply tree.
enum Building {
    List {
        kind: ListKind,
        want: usize,
        items: Vec<Reply>,
    },
    Pairs {
        attribute: bool,
        want: usize,
        pairs: Vec<(Reply, Reply)>,
        key: Option<Reply>,
    },
    /// Attribute pairs done; the next value gets annotated.
    AttrValue { attrs: Vec<(Reply, Reply)> },
}

#[derive(Clone, Copy)]
enum ListKind {
    Array,
    Set,
    Push,
}

impl ListKind {
    fn finish(self, items: Vec<Reply>) -> Reply {
        match self {
            Self::Array => Reply::Array(items),
            Self::Set => Reply::Set(items),
            Self::Push => Reply::Push(items),
        }
    }
}

/// Reads one complete top-level reply value from the receive pipe.
async fn read_reply(io: &mut Io, token: &CancellationToken) -> Result<Reply> {
    let mut stack: Vec<Building> = Vec::new();

    loop {
        let tok = next_token(io, token, None).await?;
        let mut finished: Option<Reply> = match tok.kind {
            TokenKind::SimpleString => Some(Reply::Simple(tok.value_bytes())),
            TokenKind::Error => Some(Reply::Error(tok.value_bytes())),
            TokenKind::Integer => Some(Reply::Integer(signed_integer(&tok.value_span)?)),
            TokenKind::Null => Some(Reply::Null),
            TokenKind::Boolean => {
                Some(Reply::Boolean(
                    tok.value_span.value_at(tok.value_span.start_index()) == Some(b't'),
                ))
            }
            TokenKind::Double => Some(Reply::Double(parse_double(&tok)?)),
            TokenKind::BigNumber => Some(Reply::BigNumber(tok.value_bytes())),
            TokenKind::BulkStringHeader(len) => {
                let payload = next_token(io, token, Some(len)).await?;
                Some(Reply::Bulk(payload.value_bytes()))
            }
            TokenKind::VerbatimStringHeader(len) => {
                let payload = next_token(io, token, Some(len)).await?;
                let (format, data) = split_verbatim(payload.value_bytes())?;
                Some(Reply::Verbatim { format, data })
            }
            TokenKind::ArrayHeader(n) => open_list(&mut stack, ListKind::Array, n),
            TokenKind::SetHeader(n) => open_list(&mut stack, ListKind::Set, n),
            TokenKind::PushHeader(n) => open_list(&mut stack, ListKind::Push, n),
            TokenKind::MapHeader(n) => open_pairs(&mut stack, false, n),
            TokenKind::AttributeHeader(n) => open_pairs(&mut stack, true, n),
            TokenKind::BulkString => {
                unreachable!("payload tokens are only produced by try_read_bulk_string")
            }
        };

        // Fold completed values into their parent containers.
        while let Some(value) = finished.take() {
            let Some(top) = stack.last_mut() else {
                return Ok(value);
            };
            match top {
                Building::List { want, items, .. } => {
                    items.push(value);
                    if items.len() == *want {
                        let Some(Building::List { kind, items, .. }) = stack.pop() else {
                            unreachable!()
                        };
                        finished = Some(kind.finish(items));
                    }
                }
                Building::Pairs {
                    want, pairs, key, ..
                } => match key.take() {
                    None => *key = Some(value),
                    Some(k) => {
                        pairs.push((k, value));
                        if pairs.len() == *want {
                            let Some(Building::Pairs {
                                attribute, pairs, ..
                            }) = stack.pop()
                            else {
                                unreachable!()
                            };
                            if attribute {
                                stack.push(Building::AttrValue { attrs: pairs });
                            } else {
                                finished = Some(Reply::Map(pairs));
                            }
                        }
                    }
                },
                Building::AttrValue { .. } => {
                    let Some(Building::AttrValue { attrs }) = stack.pop() else {
                        unreachable!()
                    };
                    finished = Some(Reply::Attribute {
                        attrs,
                        value: Box::new(value),
                    });
                }
            }
        }
    }
}

fn open_list(stack: &mut Vec<Building>, kind: ListKind, n: i64) -> Option<Reply> {
    if n == 0 {
        return Some(kind.finish(Vec::new()));
    }
    stack.push(Building::List {
        kind,
        want: n as usize,
        items: Vec::with_capacity((n as usize).min(1024)),
    });
    None
}

fn open_pairs(stack: &mut Vec<Building>, attribute: bool, n: i64) -> Option<Reply> {
    if n == 0 {
        if attribute {
            stack.push(Building::AttrValue { attrs: Vec::new() });
            return None;
        }
        return Some(Reply::Map(Vec::new()));
    }
    stack.push(Building::Pairs {
        attribute,
        want: n as usize,
        pairs: Vec::with_capacity((n as usize).min(1024)),
        key: None,
    });
    None
}

fn parse_double(tok: &Token) -> Result<f64> {
    let bytes = tok.value_bytes();
    let text = std::str::from_utf8(&bytes).map_err(|_| ProtocolError::InvalidIntegerDigit)?;
    let value = text
        .parse::<f64>()
        .map_err(|_| ProtocolError::InvalidIntegerDigit)?;
    Ok(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pumps
// ─────────────────────────────────────────────────────────────────────────────

/// Drains the send pipe into the socket. Multiple pending segments go out in
/// one vectored write.
async fn run_send_pump(
    mut pipe: PipeReader,
    mut socket: OwnedWriteHalf,
    status: Arc<StatusCell>,
    id: u64,
) {
    loop {
        let view = pipe.read().await;
        if view.is_canceled {
            break;
        }
        let buffer = view.buffer;
        if !buffer.is_empty() {
            let written = if buffer.segment_count() > 1 {
                let slices: Vec<IoSlice<'_>> =
                    buffer.segments().map(|seg| IoSlice::new(seg)).collect();
                socket.write_vectored(&slices).await
            } else {
                match buffer.segments().next() {
                    Some(seg) => socket.write(seg).await,
                    None => Ok(0),
                }
            };
            match written {
                Ok(0) => {
                    warn!(id, "socket rejected write");
                    status.mark_failed();
                    pipe.cancel();
                    break;
                }
                Ok(n) => {
                    trace!(id, bytes = n, "sent");
                    pipe.advance_to(buffer.start_index() + n as u64);
                    continue;
                }
                Err(e) => {
                    warn!(id, error = %e, "send failed");
                    status.mark_failed();
                    pipe.cancel();
                    break;
                }
            }
        }
        if view.is_completed {
            break;
        }
    }
    trace!(id, "send pump stopped");
}

/// Fills the receive pipe from the socket. With on-demand buffering the pump
/// waits for readability before taking pipe memory, so idle connections pin
/// no receive buffer.
async fn run_recv_pump(
    mut pipe: PipeWriter,
    mut socket: OwnedReadHalf,
    status: Arc<StatusCell>,
    on_demand: bool,
    id: u64,
) {
    loop {
        if on_demand {
            if let Err(e) = socket.readable().await {
                warn!(id, error = %e, "receive readiness failed");
                status.mark_failed();
                pipe.cancel();
                break;
            }
        }
        let memory = pipe.get_memory(RECV_CHUNK);
        match socket.read(memory).await {
            Ok(0) => {
                debug!(id, "peer closed the connection");
                pipe.complete();
                break;
            }
            Ok(n) => {
                trace!(id, bytes = n, "received");
                pipe.advance(n);
                let flushed = pipe.flush().await;
                if flushed.is_canceled || flushed.is_completed {
                    break;
                }
            }
            Err(e) => {
                warn!(id, error = %e, "receive failed");
                status.mark_failed();
                pipe.cancel();
                break;
            }
        }
    }
    trace!(id, "receive pump stopped");
}
