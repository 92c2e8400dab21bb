//! collabd — collaborative session coordination server.
//!
//! A single-process server that tracks which connections occupy which roles
//! of shared sessions, routes messages between them, and dispatches service
//! invocations. Clients connect over WebSocket.
//!
//! Usage:
//!   collabd                        # Default port 8080
//!   collabd --port 9090            # Custom port
//!   collabd --grace-secs 30        # Longer idle-session grace period

use std::time::Duration;

use clap::Parser;
use collab_services::AppContext;
use collab_transport::{TransportConfig, TransportServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "collabd", about = "Collaborative session coordination server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "256")]
    max_connections: usize,

    /// Grace period in seconds before an empty session is reclaimed
    #[arg(long, default_value = "10")]
    grace_secs: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let app = AppContext::new(Duration::from_secs(cli.grace_secs));
    info!(
        services = app.broker.descriptors().len(),
        "application context ready"
    );

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        max_connections: Some(cli.max_connections),
    };

    let mut transport = match TransportServer::start(transport_config, app.clone()).await {
        Ok(t) => t,
        Err(e) => {
            error!("failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "collabd running on ws://{}:{}/ws — press Ctrl+C to stop",
        cli.hostname,
        transport.port()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    app.registry.close_all();
    transport.stop().await;
    info!("server stopped");
}
