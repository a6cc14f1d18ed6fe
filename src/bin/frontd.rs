//! frontd - front-door TCP relay
//!
//! Accepts client connections, decrypts the backend address carried in the
//! first bytes (binary, newline, or HTTP dialect), dials that backend, and
//! pipes bytes both ways until either side closes.

use anyhow::{Context, Result};
use clap::Parser;
use frontd::{Config, Server};
use tracing::info;

/// Front-door TCP relay - routes clients by an encrypted backend address
#[derive(Parser, Debug)]
#[command(name = "frontd")]
#[command(about = "Front-door TCP relay routing clients by encrypted backend address")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Shared secret passphrase (required here or in the config file)
    #[arg(long, env = "SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Listener port (overrides config)
    #[arg(short, long, env = "LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Backend dial timeout in seconds
    #[arg(long, env = "BACKEND_TIMEOUT")]
    backend_timeout: Option<u64>,

    /// Forwarder idle read timeout in seconds; 0 disables
    #[arg(long, env = "CONN_READ_TIMEOUT")]
    conn_read_timeout: Option<u64>,

    /// Cap on the buffered HTTP preamble in bytes
    #[arg(long, env = "MAX_HTTP_HEADER_SIZE")]
    max_http_header_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    // Load configuration, then let flags and environment override it
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    if let Some(secret) = args.secret {
        config.secret = secret;
    }
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if let Some(timeout) = args.backend_timeout {
        config.backend_timeout = timeout;
    }
    if let Some(timeout) = args.conn_read_timeout {
        config.conn_read_timeout = timeout;
    }
    if let Some(size) = args.max_http_header_size {
        config.max_http_header_size = size;
    }

    config.validate()?;

    info!("frontd v{}", frontd::VERSION);

    let server = Server::bind(config)
        .await
        .context("Failed to bind listener")?;

    tokio::select! {
        result = server.run() => {
            result.context("Listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
