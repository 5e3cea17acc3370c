//! Listener and Accept Loop
//!
//! [`Server`] binds the listening socket, builds the shared state every
//! connection uses and, on a replica, starts the link to the leader.
//! Shutdown is a `watch` channel: flipping it to `true` stops the accept
//! loop, every connection task and the replica link.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::replication::{run_replica_link, ReplicationState};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Server {
    listener: TcpListener,
    handler: CommandHandler,
}

impl Server {
    /// Binds `config.bind_address()`. Port 0 picks an ephemeral port.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("failed to bind {}", config.bind_address()))?;

        let mut config = config;
        // Announce the port actually bound in REPLCONF listening-port.
        config.port = listener.local_addr()?.port();

        let replication = ReplicationState::new(config.replica_of.clone())
            .context("failed to decode the empty snapshot")?;
        let handler = CommandHandler::new(Arc::new(config), Arc::new(replication));

        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The handler shared by every connection. Useful for inspecting state.
    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    /// Serves until `shutdown` becomes `true`.
    pub async fn run_until(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Server { listener, handler } = self;
        info!(
            addr = %listener.local_addr()?,
            role = handler.replication().role().as_str(),
            "Listening"
        );

        if let Some(leader) = handler.config().replica_of.clone() {
            let link_handler = handler.clone();
            let link_shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(leader = %leader, "Replicating");
                if let Err(e) = run_replica_link(leader, link_handler, link_shutdown).await {
                    error!(error = %e, "Replication link aborted");
                }
            });
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            handler.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Server shutdown complete");
        Ok(())
    }
}
