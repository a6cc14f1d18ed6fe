//! HTTP dialect handling
//!
//! The request line and headers are read one line at a time and rebuilt
//! into a preamble that is replayed to the backend before forwarding
//! begins. Two headers get special treatment: `X-Cipher-Origin` carries the
//! routing token and is dropped from the preamble, and `X-Forwarded-For`
//! values are folded into a synthetic header that leads with the peer's
//! own IP, so the backend always sees the real client address first.
//!
//! Header names match ASCII case-insensitively; CRLF line endings are
//! accepted on input and the replayed preamble uses `\n` terminators.

use std::net::SocketAddr;

use tracing::debug;

use super::{read_line, resolve_text, IngressError, LineError, Route};
use crate::cache::AddrCache;
use crate::config::Config;
use crate::reporter::ReportMode;

/// Header carrying the base64 routing token
const CIPHER_HEADER: &[u8] = b"X-Cipher-Origin";

/// Header rewritten with the connection's peer IP
const FORWARDED_HEADER: &[u8] = b"X-Forwarded-For";

/// Accumulate headers after an HTTP request line and build the preamble
pub(super) async fn handshake<R>(
    reader: &mut R,
    peer: SocketAddr,
    cache: &AddrCache,
    config: &Config,
    request_line: Vec<u8>,
) -> Result<Route, IngressError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let cap = config.max_http_header_size;
    let mut preamble = Preamble::new(cap);
    preamble.push_line(&request_line)?;

    let mut token: Option<Vec<u8>> = None;
    let mut forwarded: Option<Vec<u8>> = None;

    loop {
        let line = read_line(reader, cap).await.map_err(|e| match e {
            LineError::Io(e) => IngressError::HeaderRead(e),
            LineError::TooLong => IngressError::PreambleOverflow(cap),
        })?;

        if line.is_empty() {
            break;
        }

        match split_header(&line) {
            Some((name, value)) if name.eq_ignore_ascii_case(CIPHER_HEADER) => {
                token = Some(value.to_vec());
            }
            Some((name, value)) if name.eq_ignore_ascii_case(FORWARDED_HEADER) => {
                match forwarded.as_mut() {
                    Some(existing) => {
                        existing.extend_from_slice(b", ");
                        existing.extend_from_slice(value);
                    }
                    None => forwarded = Some(value.to_vec()),
                }
            }
            _ => preamble.push_line(&line)?,
        }
    }

    let token = token.ok_or(IngressError::MissingCipherHeader)?;

    let mut xff = Vec::with_capacity(FORWARDED_HEADER.len() + 32);
    xff.extend_from_slice(FORWARDED_HEADER);
    xff.extend_from_slice(b": ");
    xff.extend_from_slice(client_ip(peer).as_bytes());
    if let Some(values) = forwarded {
        xff.extend_from_slice(b", ");
        xff.extend_from_slice(&values);
    }
    preamble.push_line(&xff)?;
    preamble.push_line(b"")?;

    debug!(peer = %peer, "http preamble of {} bytes", preamble.len());

    let addr = resolve_text(cache, config, &token)?;
    Ok(Route {
        addr,
        preamble: preamble.into_bytes(),
        mode: ReportMode::Http,
    })
}

/// Split a header line at the first colon, trimming both sides
fn split_header(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = line.iter().position(|&b| b == b':')?;
    Some((line[..idx].trim_ascii(), line[idx + 1..].trim_ascii()))
}

/// The peer address with its last `:`-delimited field (the port) stripped
fn client_ip(peer: SocketAddr) -> String {
    let s = peer.to_string();
    match s.rfind(':') {
        Some(idx) => s[..idx].to_string(),
        None => s,
    }
}

/// Size-capped accumulator for the replayed request bytes
struct Preamble {
    buf: Vec<u8>,
    cap: usize,
}

impl Preamble {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(1024)),
            cap,
        }
    }

    fn push_line(&mut self, line: &[u8]) -> Result<(), IngressError> {
        self.buf.extend_from_slice(line);
        self.buf.push(b'\n');
        if self.buf.len() > self.cap {
            return Err(IngressError::PreambleOverflow(self.cap));
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt;
    use crate::reporter::ErrorCode;
    use tokio::io::BufReader;

    const SECRET: &str = "p0S8rX680*48";

    fn test_config() -> Config {
        Config {
            secret: SECRET.to_string(),
            ..Config::default()
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:5555".parse().unwrap()
    }

    async fn run(headers: &[u8], config: &Config) -> Result<Route, IngressError> {
        let cache = AddrCache::new();
        let mut reader = BufReader::new(headers);
        handshake(
            &mut reader,
            peer(),
            &cache,
            config,
            b"GET / HTTP/1.1".to_vec(),
        )
        .await
    }

    fn token_header(addr: &[u8]) -> Vec<u8> {
        let mut line = b"X-Cipher-Origin: ".to_vec();
        line.extend_from_slice(&encrypt(SECRET.as_bytes(), addr));
        line.extend_from_slice(b"\r\n");
        line
    }

    #[tokio::test]
    async fn test_preamble_reconstruction() {
        let config = test_config();

        let mut input = b"Host: example.com\r\n".to_vec();
        input.extend_from_slice(&token_header(b"127.0.0.1:62863"));
        input.extend_from_slice(b"X-Forwarded-For: 8.8.8.8, 8.8.4.4\r\n");
        input.extend_from_slice(b"Accept: */*\r\n");
        input.extend_from_slice(b"\r\n");

        let route = run(&input, &config).await.unwrap();
        assert_eq!(&*route.addr, "127.0.0.1:62863");
        assert_eq!(route.mode, ReportMode::Http);

        let preamble = String::from_utf8(route.preamble).unwrap();
        assert_eq!(
            preamble,
            "GET / HTTP/1.1\n\
             Host: example.com\n\
             Accept: */*\n\
             X-Forwarded-For: 127.0.0.1, 8.8.8.8, 8.8.4.4\n\
             \n"
        );
        assert!(!preamble.contains("X-Cipher-Origin"));
    }

    #[tokio::test]
    async fn test_no_client_forwarded_for() {
        let config = test_config();

        let mut input = token_header(b"127.0.0.1:62863");
        input.extend_from_slice(b"\r\n");

        let route = run(&input, &config).await.unwrap();
        let preamble = String::from_utf8(route.preamble).unwrap();
        assert!(preamble.ends_with("X-Forwarded-For: 127.0.0.1\n\n"));
    }

    #[tokio::test]
    async fn test_header_name_case_insensitive() {
        let config = test_config();

        let mut input = b"x-cipher-origin: ".to_vec();
        input.extend_from_slice(&encrypt(SECRET.as_bytes(), b"10.9.8.7:80"));
        input.extend_from_slice(b"\r\nX-FORWARDED-FOR: 1.2.3.4\r\n\r\n");

        let route = run(&input, &config).await.unwrap();
        assert_eq!(&*route.addr, "10.9.8.7:80");
        let preamble = String::from_utf8(route.preamble).unwrap();
        assert!(preamble.contains("X-Forwarded-For: 127.0.0.1, 1.2.3.4\n"));
    }

    #[tokio::test]
    async fn test_multiple_forwarded_for_headers_folded() {
        let config = test_config();

        let mut input = token_header(b"10.9.8.7:80");
        input.extend_from_slice(b"X-Forwarded-For: 1.1.1.1\r\n");
        input.extend_from_slice(b"X-Forwarded-For: 2.2.2.2\r\n");
        input.extend_from_slice(b"\r\n");

        let route = run(&input, &config).await.unwrap();
        let preamble = String::from_utf8(route.preamble).unwrap();
        assert!(preamble.contains("X-Forwarded-For: 127.0.0.1, 1.1.1.1, 2.2.2.2\n"));
    }

    #[tokio::test]
    async fn test_missing_cipher_header() {
        let config = test_config();

        let err = run(b"Host: example.com\r\n\r\n", &config).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn test_oversize_header_line() {
        let config = test_config();

        let mut input = b"X-Padding: ".to_vec();
        input.extend_from_slice(&vec![b'a'; 16 * 1024]);
        input.extend_from_slice(b"\r\n\r\n");

        let err = run(&input, &config).await.unwrap_err();
        assert!(matches!(err, IngressError::PreambleOverflow(_)));
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn test_preamble_overflow_accumulated() {
        let mut config = test_config();
        config.max_http_header_size = 64;

        let mut input = token_header(b"10.0.0.1:80");
        input.extend_from_slice(b"A: aaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        input.extend_from_slice(b"B: bbbbbbbbbbbbbbbbbbbbbbbb\r\n");
        input.extend_from_slice(b"C: cccccccccccccccccccccccc\r\n");
        input.extend_from_slice(b"\r\n");

        let err = run(&input, &config).await.unwrap_err();
        assert!(matches!(err, IngressError::PreambleOverflow(64)));
    }

    #[tokio::test]
    async fn test_truncated_headers() {
        let config = test_config();

        let err = run(b"Host: example.com\r\n", &config).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::HeaderRead);
    }

    #[test]
    fn test_client_ip_strips_port() {
        assert_eq!(client_ip("127.0.0.1:5555".parse().unwrap()), "127.0.0.1");
        assert_eq!(client_ip("[::1]:443".parse().unwrap()), "[::1]");
    }

    #[test]
    fn test_split_header() {
        assert_eq!(
            split_header(b"Host:  example.com "),
            Some((&b"Host"[..], &b"example.com"[..]))
        );
        assert_eq!(split_header(b"no colon here"), None);
    }
}
