//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::RootCertStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use tunnel_proxy::certs::{generate, CertPair, CertParams};
use tunnel_proxy::config::TunnelConfig;
use tunnel_proxy::lifecycle::Shutdown;
use tunnel_proxy::net::tls::{client_config_with_roots, load_identity, server_config};
use tunnel_proxy::net::Listener;
use tunnel_proxy::tunnel::Connect;
use tunnel_proxy::TunnelServer;

/// Start a TCP target that writes back everything it reads.
pub async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });
    addr
}

/// Start a TLS target that writes back everything it reads.
pub async fn start_tls_echo_target(identity: &CertPair) -> SocketAddr {
    let acceptor = TlsAcceptor::from(Arc::new(server_config(identity).unwrap()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(socket).await else {
                    return;
                };
                let (mut reader, mut writer) = tokio::io::split(tls);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });
    addr
}

/// Start a target that records everything it reads and closes on EOF.
pub async fn start_recording_target() -> (SocketAddr, tokio::sync::oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut received = Vec::new();
            let _ = socket.read_to_end(&mut received).await;
            let _ = tx.send(received);
        }
    });
    (addr, rx)
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Self-signed identity for `localhost`.
pub fn localhost_identity() -> CertPair {
    generate(&CertParams::new("localhost,127.0.0.1")).unwrap()
}

/// Client config trusting exactly `identity`.
pub fn trusting(identity: &CertPair) -> rustls::ClientConfig {
    let (certs, _) = load_identity(identity).unwrap();
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert).unwrap();
    }
    client_config_with_roots(roots).unwrap()
}

/// Tunnel config bound to an ephemeral loopback port.
pub fn test_tunnel_config() -> TunnelConfig {
    TunnelConfig {
        bind_address: "127.0.0.1:0".to_string(),
        connect_timeout_secs: 2,
        ..TunnelConfig::default()
    }
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

/// Run `server` on an ephemeral port.
pub async fn start_proxy<D: Connect + 'static>(server: TunnelServer<D>, max_sessions: usize) -> TestProxy {
    let listener = Listener::bind("127.0.0.1:0", max_sessions).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let handle = tokio::spawn(server.run(listener, rx));
    TestProxy { addr, shutdown, handle }
}

/// Send a CONNECT request and read the response head.
///
/// Returns the stream positioned right after the head.
pub async fn send_connect(proxy: SocketAddr, target: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Read byte-by-byte up to and including the blank line.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Read exactly `len` bytes, panicking after two seconds.
pub async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading tunnel")
        .unwrap();
    buf
}
