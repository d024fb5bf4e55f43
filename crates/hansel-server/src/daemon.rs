//! Server bootstrap: wires the listener, control socket and background tasks

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use hansel_core::config::ServerConfig;
use hansel_core::error::StoreError;
use hansel_core::keys::{fingerprint, load_or_generate_key};

use crate::control::{bind_control_socket, ControlServer};
use crate::server::SshServer;
use crate::session::run_idle_reaper;
use crate::state::ServerState;

/// Run the server until `shutdown` is cancelled
///
/// Invalid settings are fatal, as is failing to load the host key, open the
/// identity files, or bind either socket. Everything after startup is
/// contained per connection.
pub async fn run_server(config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    config.validate().context("Invalid server configuration")?;
    let host_key = load_or_generate_key(&config.host_key_path).context("Failed to load host key")?;
    match host_key.clone_public_key() {
        Ok(public) => tracing::info!("Host key fingerprint: {}", fingerprint(&public)),
        Err(e) => tracing::warn!("Cannot compute host key fingerprint: {}", e),
    }

    let state = Arc::new(
        ServerState::open(config)
            .context("Failed to open server state")?
            .with_shutdown(shutdown),
    );
    tracing::info!(
        "Loaded {} task definitions",
        state.distributor.catalog().len()
    );

    let listener = SshServer::bind(&state.config.bind_address).await?;
    let control_listener = bind_control_socket(&state.config.control_socket_path)?;

    let control = ControlServer::new(
        state.config.control_socket_path.clone(),
        Arc::clone(&state.registry),
        state.shutdown.clone(),
    );
    let control_task = tokio::spawn(control.run(control_listener));

    if let Some(idle_timeout) = state.config.idle_timeout {
        tokio::spawn(run_idle_reaper(
            Arc::clone(&state.registry),
            idle_timeout,
            state.shutdown.clone(),
        ));
    }

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(Arc::clone(&state)));

    let server = SshServer::new(host_key, Arc::clone(&state));
    let result = server.run(listener).await;

    state.shutdown.cancel();
    match control_task.await {
        Ok(Err(e)) => tracing::warn!("Control server stopped with error: {}", e),
        Err(e) => tracing::warn!("Control server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Server shutdown complete");
    result
}

/// Reload the task directory and push every task to the fleet
pub fn reload_tasks(state: &ServerState) -> Result<usize, StoreError> {
    let count = state
        .distributor
        .catalog()
        .reload(&state.config.tasks_dir, state.config.max_task_file_size)?;

    for (sequence, report) in state.distributor.distribute_all() {
        if !report.is_complete() {
            tracing::warn!(
                "Task {}: {} targets not reached",
                sequence,
                report.failures.len()
            );
        }
    }
    Ok(count)
}

#[cfg(unix)]
async fn reload_on_hangup(state: Arc<ServerState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!("Cannot install SIGHUP handler, task reload disabled: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                tracing::info!("Received SIGHUP, reloading tasks");
                match reload_tasks(&state) {
                    Ok(count) => tracing::info!("Reloaded {} task definitions", count),
                    Err(e) => tracing::error!("Task reload failed: {}", e),
                }
            }
        }
    }
}
