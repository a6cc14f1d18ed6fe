//! # frontd
//!
//! A front-door TCP relay that hides real backend addresses behind an
//! encrypted routing token carried in the first bytes of each connection.
//!
//! ## Features
//!
//! - **Three wire dialects** on one port: binary length-prefixed, raw
//!   newline-terminated base64, and HTTP/1.x header-carried tokens
//! - **OpenSSL-compatible tokens**: AES-256-CBC in the `openssl enc
//!   -aes-256-cbc -a -salt` format, so clients can mint tokens with the
//!   stock OpenSSL CLI
//! - **Lock-free address cache**: each distinct token is decrypted once and
//!   served from a copy-on-write map afterwards
//! - **Transparent forwarding**: after the handshake the relay is a plain
//!   bidirectional byte pipe with idle-timeout re-arming
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Listener                         │
//! │         (accept loop, per-connection tasks)          │
//! ├──────────────────────────────────────────────────────┤
//! │                     Ingress                          │
//! │    (dialect discrimination, token extraction,        │
//! │     HTTP preamble reconstruction)                    │
//! ├──────────────────────────────────────────────────────┤
//! │              Address cache  ◄──  Codec               │
//! │   (copy-on-write token→addr map, AES-256-CBC)        │
//! ├──────────────────────────────────────────────────────┤
//! │                      Tunnel                          │
//! │   (backend dial, preamble replay, two forwarders)    │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod crypto;
pub mod ingress;
pub mod listener;
pub mod reporter;
pub mod tunnel;

pub use config::Config;
pub use listener::Server;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listening port
pub const DEFAULT_PORT: u16 = 4043;

/// Upper bound on a decrypted backend address, in bytes
pub const MAX_BACKEND_ADDR_LEN: usize = 255;

/// Copy buffer size per forwarding direction (8 KiB)
pub const FORWARD_BUF_SIZE: usize = 8192;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Ingress error: {0}")]
    Ingress(#[from] ingress::IngressError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
