//! Tunnel layer - backend dial and bidirectional forwarding
//!
//! Once ingress has resolved a backend address, the tunnel dials it within
//! a bounded budget, replays any buffered HTTP preamble, and then runs two
//! independent forwarder tasks (client→backend and backend→client). Each
//! forwarder owns its source read half and destination write half; when it
//! exits it shuts down the destination, which the peer direction observes
//! as EOF. Socket shutdown is the only cross-direction cancellation
//! primitive; there is no shared token.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::config::Config;
use crate::ingress::Route;
use crate::reporter::{self, ErrorCode};
use crate::FORWARD_BUF_SIZE;

/// Back-off before retrying a dial that failed for lack of a local port
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Tunnel errors
///
/// Only dial-phase failures exist as values; forwarding-phase errors end
/// the affected direction silently because the tunnel has no frame to
/// carry a code once payload is flowing.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("backend dial timed out")]
    DialTimeout,

    #[error("backend dial failed: {0}")]
    Dial(#[source] io::Error),
}

impl TunnelError {
    /// The client-visible code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            TunnelError::DialTimeout => ErrorCode::BackendTimeout,
            TunnelError::Dial(_) => ErrorCode::BackendUnreachable,
        }
    }
}

/// Dial the backend within the timeout budget
///
/// `AddrNotAvailable` means local ephemeral port exhaustion; it is retried
/// after a back-off for as long as budget remains. Everything else fails
/// immediately, classified into timeout vs. generic dial failure.
pub async fn dial(addr: &str, budget: Duration) -> Result<TcpStream, TunnelError> {
    let deadline = Instant::now() + budget;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TunnelError::DialTimeout);
        }

        match timeout(remaining, TcpStream::connect(addr)).await {
            Err(_) => return Err(TunnelError::DialTimeout),
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) if e.kind() == io::ErrorKind::AddrNotAvailable => {
                if Instant::now() + RETRY_DELAY >= deadline {
                    return Err(TunnelError::DialTimeout);
                }
                debug!("no local port for {}, retrying in {:?}", addr, RETRY_DELAY);
                sleep(RETRY_DELAY).await;
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(TunnelError::DialTimeout)
            }
            Ok(Err(e)) => return Err(TunnelError::Dial(e)),
        }
    }
}

/// Dial the routed backend, replay the preamble, and forward both
/// directions until the connection winds down
///
/// Dial-phase failures are reported to the client in the handshake
/// dialect's form before this returns.
pub async fn run<R, W>(
    client_rd: R,
    mut client_wr: W,
    route: Route,
    config: &Config,
) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let backend = match dial(&route.addr, config.dial_timeout()).await {
        Ok(stream) => stream,
        Err(err) => {
            reporter::report(&mut client_wr, err.code(), route.mode).await;
            return Err(err);
        }
    };
    backend.set_nodelay(true).ok();

    let (backend_rd, mut backend_wr) = backend.into_split();

    if !route.preamble.is_empty() {
        if let Err(e) = backend_wr.write_all(&route.preamble).await {
            let err = TunnelError::Dial(e);
            reporter::report(&mut client_wr, err.code(), route.mode).await;
            return Err(err);
        }
    }

    debug!("tunnel up to {}", route.addr);

    let idle = config.idle_timeout();
    let client_to_backend = tokio::spawn(forward(client_rd, backend_wr, idle));
    let backend_to_client = tokio::spawn(forward(backend_rd, client_wr, idle));

    let _ = tokio::join!(client_to_backend, backend_to_client);
    Ok(())
}

/// Copy bytes from `src` to `dst` until EOF or a hard error
///
/// An idle timeout expiry re-arms the read rather than ending the
/// direction, so long-lived mostly-idle connections survive. On exit the
/// destination write half is shut down to unblock the peer direction.
pub(crate) async fn forward<R, W>(mut src: R, mut dst: W, idle: Option<Duration>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; FORWARD_BUF_SIZE];

    loop {
        let read = match idle {
            Some(limit) => match timeout(limit, src.read(&mut buf)).await {
                Err(_) => continue,
                Ok(read) => read,
            },
            None => src.read(&mut buf).await,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = dst.write_all(&buf[..n]).await {
                    trace!("forward write ended: {}", e);
                    break;
                }
            }
            Err(e) => {
                trace!("forward read ended: {}", e);
                break;
            }
        }
    }

    let _ = dst.shutdown().await;
}
