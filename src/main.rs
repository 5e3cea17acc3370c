//! redwire server binary
//!
//! Parses the command line, sets up logging and runs the server until
//! Ctrl+C.

use clap::Parser;
use redwire::config::{Args, ServerConfig};
use redwire::server::Server;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    let role = match &config.replica_of {
        Some(leader) => format!("replica of {}", leader),
        None => "leader".to_string(),
    };
    println!(
        r#"
redwire v{}
──────────────────────────────────────────────
Listening on {} ({})
Use Ctrl+C to shutdown gracefully.
"#,
        redwire::VERSION,
        config.bind_address(),
        role
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from(Args::parse());

    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let server = Server::bind(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    server.run_until(shutdown_rx).await
}
