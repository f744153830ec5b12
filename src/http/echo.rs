//! Echo listeners.
//!
//! # Responsibilities
//! - Plain HTTP: `/cert` and `/key` serve the mutual-TLS identity, every
//!   other path echoes the request
//! - HTTPS: the same echo behind a listener that requires a client
//!   certificate
//!
//! The echo body is a JSON object describing the request (sorted keys,
//! header names in canonical form, repeated values joined with `,`)
//! followed by the raw request body.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::certs::CertStore;
use crate::http::server::DRAIN_TIMEOUT;

/// Largest request body the echo handler buffers.
pub const MAX_ECHO_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy)]
struct EchoState {
    certs: &'static CertStore,
    scheme: &'static str,
}

/// Router for the plain listener.
pub fn http_router(certs: &'static CertStore) -> Router {
    Router::new()
        .route("/cert", get(cert_handler))
        .route("/key", get(key_handler))
        .route("/", any(echo_handler))
        .route("/{*path}", any(echo_handler))
        .with_state(EchoState { certs, scheme: "http" })
        .layer(TraceLayer::new_for_http())
}

/// Router for the mutual-TLS listener.
pub fn https_router(certs: &'static CertStore) -> Router {
    Router::new()
        .route("/", any(echo_handler))
        .route("/{*path}", any(echo_handler))
        .with_state(EchoState { certs, scheme: "https" })
        .layer(TraceLayer::new_for_http())
}

async fn cert_handler(State(state): State<EchoState>) -> Response {
    match state.certs.mtls_identity() {
        Ok(pair) => pair.cert_pem.clone().into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn key_handler(State(state): State<EchoState>) -> Response {
    match state.certs.mtls_identity() {
        Ok(pair) => pair.key_pem.clone().into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn echo_handler(State(state): State<EchoState>, request: Request) -> Response {
    tracing::info!(handler = state.scheme, method = %request.method(), uri = %request.uri(), "Handling echo request");

    let (parts, body) = request.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let mut fields = BTreeMap::new();
    for name in parts.headers.keys() {
        let joined = parts
            .headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        tracing::debug!(header = %canonical_header_key(name.as_str()), value = %joined, "Echo header");
        fields.insert(canonical_header_key(name.as_str()), joined);
    }
    fields.insert("Host".to_string(), host);
    fields.insert("Method".to_string(), parts.method.to_string());
    fields.insert("Proto".to_string(), format!("{:?}", parts.version));
    fields.insert("RemoteAddr".to_string(), remote_addr);
    fields.insert("RequestURI".to_string(), parts.uri.to_string());
    fields.insert("Content-Length".to_string(), declared_length(&parts.headers).to_string());

    let mut echoed = match serde_json::to_vec(&fields) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode echo headers");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    match axum::body::to_bytes(body, MAX_ECHO_BODY).await {
        Ok(bytes) => echoed.extend_from_slice(&bytes),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read echo body");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }

    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CONTENT_LENGTH, echoed.len())
        .body(Body::from(echoed))
        .unwrap_or_else(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

/// `content-length` as sent, `-1` for a chunked body, `0` when absent.
fn declared_length(headers: &axum::http::HeaderMap) -> i64 {
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        return length;
    }
    if headers.contains_key(header::TRANSFER_ENCODING) {
        -1
    } else {
        0
    }
}

/// `x-forwarded-for` becomes `X-Forwarded-For`.
fn canonical_header_key(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Serve the plain echo router until `shutdown` fires.
pub async fn serve_http(
    listener: TcpListener,
    certs: &'static CertStore,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP echo server starting");

    let app = http_router(certs).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!(address = %addr, "HTTP echo server stopped");
    Ok(())
}

/// Serve the echo router over TLS until `shutdown` fires.
pub async fn serve_https(
    listener: std::net::TcpListener,
    tls: RustlsConfig,
    certs: &'static CertStore,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    tracing::info!(address = %addr, "HTTPS echo server starting");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        shutdown_handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
    });

    let app = https_router(certs).into_make_service_with_connect_info::<SocketAddr>();
    axum_server::from_tcp_rustls(listener, tls)
        .handle(handle)
        .serve(app)
        .await?;

    tracing::info!(address = %addr, "HTTPS echo server stopped");
    Ok(())
}
