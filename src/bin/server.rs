//! ObfsTLS Server
//!
//! Accepts disguised connections and forwards them to a plain upstream:
//! - Verifies the client's fake TLS handshake
//! - Unwraps application-data records
//! - Relays bytes to the configured `forward` address

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use obfs_tls::{
    config::{generate_example_config, Config, ServerConfig},
    new_obfs,
    transport::{relay, ObfsConnection, TransportConfig, TransportError},
    ObfsError, Role, ServerInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// ObfsTLS Server - TLS 1.2 disguise for proxy traffic
#[derive(Parser, Debug)]
#[command(name = "obfs-server")]
#[command(about = "ObfsTLS Server - unwraps disguised connections to a plain upstream")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Print an example configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

/// State shared across connections
struct ServerState {
    method: String,
    info: ServerInfo,
    transport: TransportConfig,
    server: ServerConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        let example = toml::to_string_pretty(&generate_example_config())?;
        println!("{}", example);
        return Ok(());
    }

    let config = Config::load(&args.config).context("Failed to load configuration")?;

    // Initialize logging
    let level = args.log_level.unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(level).init();

    let mut server_config = config
        .server
        .clone()
        .ok_or_else(|| anyhow!("No [server] section in config file"))?;
    if let Some(listen) = args.listen {
        server_config.listen = listen;
    }

    let info = config
        .obfs
        .server_info()
        .context("Invalid [obfs] section")?;
    // Reject unknown methods before accepting anything
    new_obfs(&config.obfs.method, Role::Server, info.clone())?;

    let state = Arc::new(ServerState {
        method: config.obfs.method.clone(),
        transport: config.obfs.transport_config(server_config.handshake_timeout),
        info,
        server: server_config,
    });

    info!("ObfsTLS Server v{}", obfs_tls::VERSION);
    info!("Listening on {}", state.server.listen);
    info!("Forwarding to {}", state.server.forward);
    info!("Method: {}", state.method);

    let listener = TcpListener::bind(&state.server.listen)
        .await
        .context("Failed to bind to address")?;

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        debug!("New connection from {}", peer_addr);

                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                debug!("Connection from {} ended: {:#}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    stream.set_nodelay(true)?;

    let obfs = new_obfs(&state.method, Role::Server, state.info.clone())?;
    let mut conn = match ObfsConnection::accept(stream, obfs, state.transport.clone()).await {
        Ok(conn) => conn,
        Err(TransportError::Obfs(ObfsError::AuthMismatch))
        | Err(TransportError::Obfs(ObfsError::ReplayOrStale { .. })) => {
            // Both cases look the same from outside
            warn!("Handshake from {} rejected", peer_addr);
            return Ok(());
        }
        Err(e) => return Err(e).context("Handshake failed"),
    };
    debug!("Handshake with {} complete", peer_addr);

    let mut upstream = TcpStream::connect(&state.server.forward)
        .await
        .with_context(|| format!("Failed to connect to {}", state.server.forward))?;
    upstream.set_nodelay(true)?;

    let stats = relay(
        &mut conn,
        &mut upstream,
        obfs_tls::protocol::RELAY_BUFFER_SIZE,
        Duration::from_secs(state.server.idle_timeout),
    )
    .await?;

    debug!(
        "Connection from {} closed: {} bytes up, {} bytes down",
        peer_addr, stats.received, stats.sent
    );
    Ok(())
}
