//! Listener - accept loop and per-connection tasks
//!
//! One task per accepted connection runs the ingress handshake and then the
//! tunnel. Transient accept errors (including fd exhaustion) back off with
//! exponential delay; anything else is fatal and takes the process down.
//! A panicking connection task is caught at the task boundary and logged,
//! never reaching the accept loop or other connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cache::AddrCache;
use crate::config::Config;
use crate::{ingress, tunnel, FORWARD_BUF_SIZE};

/// Initial back-off after a transient accept error
const BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Back-off ceiling
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// State shared by every connection task
pub struct ServerState {
    /// Immutable configuration, including the shared secret
    pub config: Config,
    /// Token → backend address cache
    pub cache: AddrCache,
}

/// The front-door server
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(config: Config) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                config,
                cache: AddrCache::new(),
            }),
        })
    }

    /// The bound address, useful when the configured port was 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the shared state
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept connections forever
    ///
    /// Returns only on a non-transient accept error; the caller turns that
    /// into a nonzero process exit.
    pub async fn run(self) -> io::Result<()> {
        let mut backoff = BACKOFF_MIN;

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    backoff = BACKOFF_MIN;
                    debug!("new connection from {}", peer);

                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let task = tokio::spawn(handle_connection(stream, peer, state));
                        if let Err(e) = task.await {
                            if e.is_panic() {
                                error!("connection task for {} panicked: {}", peer, e);
                            }
                        }
                    });
                }
                Err(e) if is_transient(&e) => {
                    warn!("transient accept error: {}, backing off {:?}", e, backoff);
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
                Err(e) => {
                    error!("fatal accept error: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

// EMFILE/ENFILE surface through raw_os_error without a stable ErrorKind.
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Accept errors that warrant back-off instead of shutdown
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(err.raw_os_error(), Some(ENFILE) | Some(EMFILE))
}

/// Run one connection: handshake, then tunnel
async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    stream.set_nodelay(true).ok();

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::with_capacity(FORWARD_BUF_SIZE, read_half);

    let route = match ingress::handshake(
        &mut reader,
        &mut write_half,
        peer,
        &state.cache,
        &state.config,
    )
    .await
    {
        Ok(route) => route,
        Err(e) => {
            debug!("handshake from {} failed: {}", peer, e);
            return;
        }
    };

    if let Err(e) = tunnel::run(reader, write_half, route, &state.config).await {
        debug!("tunnel for {} failed: {}", peer, e);
    }
}
