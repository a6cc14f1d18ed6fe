//! Client-visible error reporting
//!
//! Every handshake-phase failure is answered with exactly one code from a
//! fixed set before the connection closes. The code travels as four ASCII
//! characters, as a single byte in the binary dialect, or as a minimal
//! HTTP error response in the HTTP dialect. Forwarding-phase failures are
//! never reported; the tunnel has no frame to carry them.

use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Handshake failure codes
///
/// Credential failures (base64, decrypt, padding) share a single code so a
/// client cannot distinguish a padding error from any other rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Backend dial timed out
    BackendTimeout,
    /// Backend dial failed for any other reason
    BackendUnreachable,
    /// Initial byte read error
    InitialRead,
    /// First-line read error
    RequestLineRead,
    /// Base64 / decrypt / decode failure
    Decrypt,
    /// HTTP header line read error
    HeaderRead,
    /// HTTP cipher header missing or preamble oversize
    BadRequest,
    /// Binary token length invalid or short
    BinaryLength,
}

impl ErrorCode {
    /// Four-character ASCII form
    pub fn text(self) -> &'static str {
        match self {
            ErrorCode::BackendTimeout => "4101",
            ErrorCode::BackendUnreachable => "4102",
            ErrorCode::InitialRead => "4103",
            ErrorCode::RequestLineRead => "4104",
            ErrorCode::Decrypt => "4106",
            ErrorCode::HeaderRead => "4107",
            ErrorCode::BadRequest => "4108",
            ErrorCode::BinaryLength => "4109",
        }
    }

    /// Single-byte form for the binary dialect
    ///
    /// The HTTP-only codes have no byte form; they cannot arise on a binary
    /// connection.
    pub fn byte(self) -> Option<u8> {
        match self {
            ErrorCode::BackendTimeout => Some(0x01),
            ErrorCode::BackendUnreachable => Some(0x02),
            ErrorCode::InitialRead => Some(0x03),
            ErrorCode::RequestLineRead => Some(0x04),
            ErrorCode::Decrypt => Some(0x06),
            ErrorCode::HeaderRead => None,
            ErrorCode::BadRequest => None,
            ErrorCode::BinaryLength => Some(0x09),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Which wire form an error report takes, decided by the dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Four ASCII characters (newline dialect and pre-dialect failures)
    Text,
    /// Single byte (binary dialect)
    Binary,
    /// Minimal HTTP/1.1 error response (HTTP dialect)
    Http,
}

/// Write an error code to the client in the given form
///
/// Best-effort: the connection is about to close either way, so write
/// failures are swallowed.
pub async fn report<W>(conn: &mut W, code: ErrorCode, mode: ReportMode)
where
    W: AsyncWrite + Unpin,
{
    let payload = match mode {
        ReportMode::Text => code.text().as_bytes().to_vec(),
        ReportMode::Binary => match code.byte() {
            Some(b) => vec![b],
            None => code.text().as_bytes().to_vec(),
        },
        ReportMode::Http => {
            format!("HTTP/1.1 {} Error\nConnection: Close", code.text()).into_bytes()
        }
    };

    if let Err(e) = conn.write_all(&payload).await {
        trace!("error report write failed: {}", e);
        return;
    }
    let _ = conn.flush().await;
}
