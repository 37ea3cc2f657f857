//! ObfsTLS Client
//!
//! Listens for plain local connections and carries each one to the server
//! inside a fake TLS 1.2 session.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use obfs_tls::{
    config::{generate_example_config, ClientConfig, Config},
    new_obfs,
    transport::{relay, ObfsConnection, TransportConfig},
    Role, ServerInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// ObfsTLS Client - TLS 1.2 disguise for proxy traffic
#[derive(Parser, Debug)]
#[command(name = "obfs-client")]
#[command(about = "ObfsTLS Client - wraps local connections in a fake TLS session")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Print an example configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Local listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Server address (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

struct ClientState {
    method: String,
    info: ServerInfo,
    transport: TransportConfig,
    client: ClientConfig,
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

    let mut client_config = config
        .client
        .clone()
        .ok_or_else(|| anyhow!("No [client] section in config file"))?;
    if let Some(listen) = args.listen {
        client_config.listen = listen;
    }
    if let Some(server) = args.server {
        client_config.server = server;
    }

    let info = config
        .obfs
        .server_info()
        .context("Invalid [obfs] section")?;
    new_obfs(&config.obfs.method, Role::Client, info.clone())?;

    let state = Arc::new(ClientState {
        method: config.obfs.method.clone(),
        transport: config.obfs.transport_config(client_config.handshake_timeout),
        info,
        client: client_config,
    });

    info!("ObfsTLS Client v{}", obfs_tls::VERSION);
    info!("Listening on {}", state.client.listen);
    info!("Server: {}", state.client.server);

    let listener = TcpListener::bind(&state.client.listen)
        .await
        .context("Failed to bind to address")?;

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((local, peer_addr)) => {
                        debug!("Local connection from {}", peer_addr);

                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_local(local, state).await {
                                debug!("Local connection {} ended: {:#}", peer_addr, e);
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

async fn handle_local(mut local: TcpStream, state: Arc<ClientState>) -> Result<()> {
    local.set_nodelay(true)?;

    let remote = TcpStream::connect(&state.client.server)
        .await
        .with_context(|| format!("Failed to connect to {}", state.client.server))?;
    remote.set_nodelay(true)?;

    let obfs = new_obfs(&state.method, Role::Client, state.info.clone())?;
    let mut conn = ObfsConnection::connect(remote, obfs, state.transport.clone())
        .await
        .context("Handshake failed")?;
    debug!("Handshake with {} complete", state.client.server);

    let stats = relay(
        &mut conn,
        &mut local,
        obfs_tls::protocol::RELAY_BUFFER_SIZE,
        Duration::from_secs(state.client.idle_timeout),
    )
    .await?;

    debug!("Relay finished: {} bytes sent, {} bytes received", stats.sent, stats.received);
    Ok(())
}
