//! Raw HTTP/1.1 responses for the tunnel listener.
//!
//! # Responsibilities
//! - Render plain-text error responses for rejected tunnel requests
//! - Hold the literal tunnel-established status line
//!
//! # Design Decisions
//! - Responses are pre-rendered bytes; the connection is closed after an
//!   error, so no keep-alive framing is needed
//! - The success line carries no headers: after it the stream is opaque

use axum::http::StatusCode;

/// Written to the hijacked connection once the target is reachable.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// A `text/plain` error response with `message` as its body.
pub fn error_response(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         X-Content-Type-Options: nosniff\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_status_and_length() {
        let response = String::from_utf8(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "can't connect: refused",
        ))
        .unwrap();
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains("Content-Length: 23\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\ncan't connect: refused\n"));
    }
}
