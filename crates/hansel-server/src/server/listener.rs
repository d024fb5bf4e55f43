//! SSH server listener
//!
//! Accepts incoming connections and spawns handlers for each client.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};

use crate::server::handler::{ClientHandler, SshConfig};
use crate::state::ServerState;

/// SSH server that listens for incoming agent connections
pub struct SshServer {
    /// Server configuration
    config: SshConfig,
    /// Shared server state
    state: Arc<ServerState>,
}

impl SshServer {
    /// Create a new SSH server
    pub fn new(host_key: KeyPair, state: Arc<ServerState>) -> Self {
        Self {
            config: SshConfig::new(host_key, state.config.auth_rejection_time),
            state,
        }
    }

    /// Bind the listen address
    pub async fn bind(bind_addr: &str) -> Result<TcpListener> {
        TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))
    }

    /// Accept connections until the server state is shut down
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        let cancel = self.state.shutdown.clone();
        loop {
            tokio::select! {
                // Check for shutdown
                _ = cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a new incoming connection
    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.config.ssh_config);
        let state = Arc::clone(&self.state);
        let cancel = self.state.shutdown.clone();

        // Spawn a task to handle this connection
        tokio::spawn(async move {
            let handler = ClientHandler::new(state, Some(peer_addr));

            let running = match russh::server::run_stream(config, socket, handler).await {
                Ok(running) => running,
                Err(e) => {
                    tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
                    return;
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection handler cancelled for {}", peer_addr);
                    return;
                }
                result = running => result
            };

            match result {
                Ok(_) => {
                    tracing::info!("Connection from {} closed normally", peer_addr);
                }
                Err(e) => {
                    tracing::warn!("Connection from {} closed with error: {}", peer_addr, e);
                }
            }
        });
    }
}
