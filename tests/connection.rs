//! End-to-end connection and pool tests against an in-process scripted
//! server: the test binds a listener, accepts one socket, and walks a list
//! of (expected request bytes, canned response bytes) steps.

use remora::{
    ConnectConfig, ConnectionStatus, Endpoint, Error, PoolRegistry, ProtocolVersion, Reply,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RENT_TIMEOUT: Duration = Duration::from_secs(5);

const HELLO_3: &[u8] = b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n";
const PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";
const HELLO_MAP: &[u8] = b"%1\r\n$5\r\nproto\r\n:3\r\n";
const NOPROTO: &[u8] = b"-NOPROTO sorry, this protocol version is not supported\r\n";

/// One scripted exchange: read exactly the expected bytes, then write the
/// response. An empty response closes the socket after the read.
type Step = (&'static [u8], Vec<u8>);

/// Accepts a single connection and walks the script. The socket stays open
/// (draining input) after the last step so connections can idle in a pool.
async fn spawn_server(steps: Vec<Step>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for (expect, respond) in steps {
            let mut got = vec![0u8; expect.len()];
            socket.read_exact(&mut got).await.unwrap();
            assert_eq!(
                got,
                expect,
                "server expected {:?}, got {:?}",
                String::from_utf8_lossy(expect),
                String::from_utf8_lossy(&got)
            );
            if respond.is_empty() {
                return; // close immediately
            }
            socket.write_all(&respond).await.unwrap();
        }
        let mut sink = [0u8; 512];
        loop {
            match socket.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });
    (port, handle)
}

fn config_for(port: u16) -> ConnectConfig {
    ConnectConfig::new(Endpoint::new("127.0.0.1", port))
}

#[tokio::test]
async fn resp3_handshake_then_ping() {
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (PING, b"+PONG\r\n".to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    assert_eq!(conn.status(), ConnectionStatus::New);

    let reply = conn.issue(&[b"PING"], &token).await.unwrap();
    assert_eq!(reply, Reply::Simple("PONG".into()));
    assert_eq!(conn.status(), ConnectionStatus::Ready);
    assert_eq!(conn.protocol_version(), ProtocolVersion::Resp3);

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn noproto_downgrades_to_resp2() {
    let (port, server) = spawn_server(vec![
        (HELLO_3, NOPROTO.to_vec()),
        (PING, b"+PONG\r\n".to_vec()), // handshake probe
        (PING, b"+PONG\r\n".to_vec()), // the issued command
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let reply = conn.issue(&[b"PING"], &token).await.unwrap();
    assert_eq!(reply, Reply::Simple("PONG".into()));
    assert_eq!(conn.protocol_version(), ProtocolVersion::Resp2);
    assert_eq!(conn.status(), ConnectionStatus::Ready);

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn hello_carries_auth_and_setname() {
    let hello_auth: &[u8] = b"*7\r\n$5\r\nHELLO\r\n$1\r\n3\r\n$4\r\nAUTH\r\n$4\r\nuser\r\n$4\r\npass\r\n$7\r\nSETNAME\r\n$3\r\napp\r\n";
    let (port, server) = spawn_server(vec![
        (hello_auth, HELLO_MAP.to_vec()),
        (PING, b"+PONG\r\n".to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let config = config_for(port)
        .with_credentials(Some("user".to_string()), "pass")
        .unwrap()
        .with_client_name("app")
        .unwrap();
    let pool = registry.pool("t", config).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let reply = conn.issue(&[b"PING"], &token).await.unwrap();
    assert_eq!(reply, Reply::Simple("PONG".into()));

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn rejected_handshake_fails_connection() {
    let (port, server) = spawn_server(vec![(
        HELLO_3,
        b"-DENIED you shall not pass\r\n".to_vec(),
    )])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let err = conn.issue(&[b"PING"], &token).await.unwrap_err();
    match err {
        Error::Handshake { server_message } => {
            assert_eq!(server_message.as_deref(), Some("DENIED you shall not pass"));
        }
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert_eq!(conn.status(), ConnectionStatus::Failed);

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn error_reply_is_a_reply_not_a_failure() {
    let get_cmd: &[u8] = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (get_cmd, b"-ERR unknown command 'GET'\r\n".to_vec()),
        (PING, b"+PONG\r\n".to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let reply = conn.issue(&[b"GET", b"k"], &token).await.unwrap();
    assert!(reply.is_error());
    assert_eq!(reply.as_error().as_deref(), Some("ERR unknown command 'GET'"));
    // The connection survives an error reply.
    assert_eq!(conn.status(), ConnectionStatus::Ready);
    let reply = conn.issue(&[b"PING"], &token).await.unwrap();
    assert_eq!(reply, Reply::Simple("PONG".into()));

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn fragmented_reply_is_reassembled() {
    let get_cmd: &[u8] = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
    let (port, server) = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; HELLO_3.len()];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(HELLO_MAP).await.unwrap();

            let mut buf = vec![0u8; get_cmd.len()];
            socket.read_exact(&mut buf).await.unwrap();
            // Dribble the reply out in pieces, payload CRLF split included.
            for piece in [&b"$8\r\na"[..], &b"bc\r"[..], &b"\n123"[..], &b"\r"[..], &b"\n"[..]] {
                socket.write_all(piece).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        (port, handle)
    };

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let reply = conn.issue(&[b"GET", b"k"], &token).await.unwrap();
    assert_eq!(reply, Reply::Bulk(bytes::Bytes::from_static(b"abc\r\n123")));

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn nested_resp3_reply() {
    let cmd: &[u8] = b"*1\r\n$4\r\nINFO\r\n";
    let nested: &[u8] = b"*4\r\n:7\r\n#t\r\n,3.5\r\n%1\r\n$3\r\nkey\r\n=9\r\ntxt:value\r\n";
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (cmd, nested.to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let reply = conn.issue(&[b"INFO"], &token).await.unwrap();

    let Reply::Array(items) = reply else {
        panic!("expected array, got {reply:?}");
    };
    assert_eq!(items[0], Reply::Integer(7));
    assert_eq!(items[1], Reply::Boolean(true));
    assert_eq!(items[2], Reply::Double(3.5));
    let Reply::Map(pairs) = &items[3] else {
        panic!("expected map, got {:?}", items[3]);
    };
    assert_eq!(pairs[0].0, Reply::Bulk(bytes::Bytes::from_static(b"key")));
    assert_eq!(
        pairs[0].1,
        Reply::Verbatim {
            format: *b"txt",
            data: bytes::Bytes::from_static(b"value"),
        }
    );

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn peer_close_poisons_connection_and_pool_discards_it() {
    let get_cmd: &[u8] = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (get_cmd, Vec::new()), // close without answering
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let first_id = {
        let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
        let err = conn.issue(&[b"GET", b"k"], &token).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionBroken | Error::Io(_)));
        assert_eq!(conn.status(), ConnectionStatus::Failed);

        // Failed is terminal: further use is refused without I/O.
        let err = conn.issue(&[b"PING"], &token).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionBroken));
        conn.id()
    };

    // The poisoned connection was discarded, not re-queued.
    assert_eq!(pool.idle_len(), 0);
    let conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    assert_ne!(conn.id(), first_id);
    assert_eq!(conn.status(), ConnectionStatus::New);

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn returned_connection_is_reused_connected() {
    let get_cmd: &[u8] = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (PING, b"+PONG\r\n".to_vec()),
        (get_cmd, b"$2\r\nhi\r\n".to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let first_id = {
        let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
        conn.issue(&[b"PING"], &token).await.unwrap();
        conn.id()
    };

    // Same connection comes back, already handshaken: no second HELLO in
    // the server script.
    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    assert_eq!(conn.id(), first_id);
    assert_eq!(conn.status(), ConnectionStatus::Ready);
    let reply = conn.issue(&[b"GET", b"k"], &token).await.unwrap();
    assert_eq!(reply, Reply::Bulk(bytes::Bytes::from_static(b"hi")));

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn pre_cancelled_issue_leaves_connection_clean() {
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (PING, b"+PONG\r\n".to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    conn.issue(&[b"PING"], &token).await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = conn.issue(&[b"PING"], &cancelled).await.unwrap_err();
    assert!(matches!(err, Error::Canceled));
    // Nothing was sent; the connection is still good.
    assert_eq!(conn.status(), ConnectionStatus::Ready);

    drop(conn);
    server.abort();
}

#[tokio::test]
async fn connect_failure_surfaces_transport_error() {
    // Bind-then-drop to get a port with no listener.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    let err = conn.issue(&[b"PING"], &token).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(conn.status(), ConnectionStatus::Failed);
}

#[tokio::test]
async fn dispose_closes_the_connection() {
    let (port, server) = spawn_server(vec![
        (HELLO_3, HELLO_MAP.to_vec()),
        (PING, b"+PONG\r\n".to_vec()),
    ])
    .await;

    let registry = PoolRegistry::new();
    let pool = registry.pool("t", config_for(port)).unwrap();
    let token = CancellationToken::new();

    let mut conn = pool.rent(RENT_TIMEOUT, &token).await.unwrap();
    conn.issue(&[b"PING"], &token).await.unwrap();
    conn.dispose();
    assert_eq!(conn.status(), ConnectionStatus::Closed);

    let err = conn.issue(&[b"PING"], &token).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    drop(conn);
    // Disposed connections do not rejoin the idle queue.
    assert_eq!(pool.idle_len(), 0);
    server.abort();
}
