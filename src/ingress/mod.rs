//! Ingress parser / dispatcher
//!
//! Reads the first bytes of a new connection, decides which of the three
//! wire dialects the client speaks, extracts the ciphertext token, and
//! resolves it to a backend address:
//!
//! - **Binary**: `0x00`, a one-byte length, then the raw OpenSSL blob
//! - **Newline**: a single base64 line terminated by `\n`
//! - **HTTP**: an HTTP/1.x request whose `X-Cipher-Origin` header carries
//!   the base64 token; the rest of the request is rebuilt as a preamble
//!   and replayed to the backend
//!
//! On failure the matching error code is written to the client in the
//! dialect's form before the error is returned for logging.

mod http;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite};
use tracing::debug;

use crate::cache::AddrCache;
use crate::config::Config;
use crate::crypto::{self, CryptoError};
use crate::reporter::{self, ErrorCode, ReportMode};
use crate::MAX_BACKEND_ADDR_LEN;

/// First byte announcing the binary dialect
const BINARY_MARKER: u8 = 0x00;

/// Ingress errors
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("initial byte read: {0}")]
    InitialRead(#[source] io::Error),

    #[error("first line read: {0}")]
    RequestLine(#[source] io::Error),

    #[error("binary token length invalid")]
    BinaryLength,

    #[error("header line read: {0}")]
    HeaderRead(#[source] io::Error),

    #[error("cipher header missing")]
    MissingCipherHeader,

    #[error("preamble exceeds {0} bytes")]
    PreambleOverflow(usize),

    #[error("token rejected: {0}")]
    Credential(#[from] CryptoError),
}

impl IngressError {
    /// The client-visible code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            IngressError::InitialRead(_) => ErrorCode::InitialRead,
            IngressError::RequestLine(_) => ErrorCode::RequestLineRead,
            IngressError::BinaryLength => ErrorCode::BinaryLength,
            IngressError::HeaderRead(_) => ErrorCode::HeaderRead,
            IngressError::MissingCipherHeader => ErrorCode::BadRequest,
            IngressError::PreambleOverflow(_) => ErrorCode::BadRequest,
            IngressError::Credential(_) => ErrorCode::Decrypt,
        }
    }
}

/// Outcome of a successful handshake
#[derive(Debug)]
pub struct Route {
    /// Resolved backend address
    pub addr: Arc<str>,
    /// Reconstructed HTTP request to replay to the backend first; empty
    /// outside the HTTP dialect
    pub preamble: Vec<u8>,
    /// Error-report form for the remainder of this connection
    pub mode: ReportMode,
}

/// Run the handshake state machine on a new connection
///
/// `reader` must be the buffered reader that the tunnel will keep using
/// afterwards: any payload bytes the handshake over-read stay in its buffer
/// and belong to the client→backend stream.
///
/// On failure the error code has already been written to `writer`; the
/// returned error is for logging only.
pub async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
    cache: &AddrCache,
    config: &Config,
) -> Result<Route, IngressError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut mode = ReportMode::Text;
    match dispatch(reader, peer, cache, config, &mut mode).await {
        Ok(route) => Ok(route),
        Err(err) => {
            reporter::report(writer, err.code(), mode).await;
            Err(err)
        }
    }
}

async fn dispatch<R>(
    reader: &mut R,
    peer: SocketAddr,
    cache: &AddrCache,
    config: &Config,
    mode: &mut ReportMode,
) -> Result<Route, IngressError>
where
    R: AsyncBufRead + Unpin,
{
    let first = reader.read_u8().await.map_err(IngressError::InitialRead)?;

    if first == BINARY_MARKER {
        *mode = ReportMode::Binary;
        let token = read_binary_token(reader).await?;
        debug!(peer = %peer, "binary dialect, {} byte token", token.len());
        let addr = resolve_raw(cache, config, &token)?;
        return Ok(Route {
            addr,
            preamble: Vec::new(),
            mode: ReportMode::Binary,
        });
    }

    let line = read_first_line(reader, first, config.max_http_header_size).await?;

    if line.windows(4).any(|w| w == b"HTTP") {
        *mode = ReportMode::Http;
        debug!(peer = %peer, "http dialect");
        return http::handshake(reader, peer, cache, config, line).await;
    }

    debug!(peer = %peer, "newline dialect");
    let token = line.trim_ascii_end();
    let addr = resolve_text(cache, config, token)?;
    Ok(Route {
        addr,
        preamble: Vec::new(),
        mode: ReportMode::Text,
    })
}

/// Read the one-byte length and the raw token that follows it
async fn read_binary_token<R>(reader: &mut R) -> Result<Vec<u8>, IngressError>
where
    R: AsyncBufRead + Unpin,
{
    let len = reader.read_u8().await.map_err(IngressError::InitialRead)?;
    if len == 0 {
        return Err(IngressError::BinaryLength);
    }

    let mut token = vec![0u8; len as usize];
    reader.read_exact(&mut token).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            // The client promised `len` bytes and delivered fewer.
            IngressError::BinaryLength
        } else {
            IngressError::InitialRead(e)
        }
    })?;
    Ok(token)
}

/// Read the rest of the first line, prepending the already-consumed byte
async fn read_first_line<R>(
    reader: &mut R,
    first: u8,
    limit: usize,
) -> Result<Vec<u8>, IngressError>
where
    R: AsyncBufRead + Unpin,
{
    if first == b'\n' {
        return Ok(Vec::new());
    }

    let mut rest = read_line(reader, limit).await.map_err(|e| match e {
        LineError::Io(e) => IngressError::RequestLine(e),
        LineError::TooLong => {
            IngressError::RequestLine(io::Error::new(io::ErrorKind::InvalidData, "line too long"))
        }
    })?;

    let mut line = Vec::with_capacity(rest.len() + 1);
    line.push(first);
    line.append(&mut rest);
    Ok(line)
}

pub(crate) enum LineError {
    Io(io::Error),
    TooLong,
}

/// Read one `\n`-terminated line of at most `limit` bytes, stripping the
/// terminator and an optional preceding CR
pub(crate) async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut bounded = (&mut *reader).take(limit as u64);
    bounded
        .read_until(b'\n', &mut line)
        .await
        .map_err(LineError::Io)?;

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    } else if line.len() >= limit {
        Err(LineError::TooLong)
    } else {
        Err(LineError::Io(io::ErrorKind::UnexpectedEof.into()))
    }
}

/// Resolve a base64 text token through the cache
pub(crate) fn resolve_text(
    cache: &AddrCache,
    config: &Config,
    token: &[u8],
) -> Result<Arc<str>, IngressError> {
    let secret = config.secret.as_bytes();
    cache
        .resolve_with(token, || addr_from_plaintext(crypto::decrypt(secret, token)?))
        .map_err(IngressError::Credential)
}

/// Resolve a raw binary-dialect token through the cache
fn resolve_raw(
    cache: &AddrCache,
    config: &Config,
    token: &[u8],
) -> Result<Arc<str>, IngressError> {
    let secret = config.secret.as_bytes();
    cache
        .resolve_with(token, || {
            addr_from_plaintext(crypto::decrypt_raw(secret, token)?)
        })
        .map_err(IngressError::Credential)
}

/// Validate a decrypted plaintext as a dialable backend address
fn addr_from_plaintext(plaintext: Vec<u8>) -> Result<String, CryptoError> {
    if plaintext.is_empty() || plaintext.len() > MAX_BACKEND_ADDR_LEN {
        return Err(CryptoError::BadAddress);
    }
    String::from_utf8(plaintext).map_err(|_| CryptoError::BadAddress)
}
