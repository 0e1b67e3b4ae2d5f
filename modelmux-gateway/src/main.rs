//! Gateway server binary.
//!
//! ```bash
//! # Default configuration file (config.toml) on 127.0.0.1:3000
//! modelmux-gateway
//!
//! # Custom configuration and address
//! modelmux-gateway --config /etc/modelmux/gateway.toml --host 0.0.0.0 --port 8080
//!
//! # Verbose logging
//! modelmux-gateway --log-level debug
//! ```

use clap::Parser;
use modelmux_gateway::{config::Config, server::create_server};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured listen host
    #[arg(long)]
    host: Option<String>,

    /// Logging filter (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let app = create_server(config).await?;

    tracing::info!("modelmux gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
