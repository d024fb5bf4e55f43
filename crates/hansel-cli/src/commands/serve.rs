//! Serve command implementation

use anyhow::Result;

use hansel_core::config::ServerConfig;

use super::shutdown_on_signal;

/// Run the server in the foreground until a shutdown signal arrives
pub async fn serve_command(mut config: ServerConfig, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_address = bind;
    }

    tracing::info!("hansel server starting on {}", config.bind_address);
    let shutdown = shutdown_on_signal();
    hansel_server::run_server(config, shutdown).await?;
    tracing::info!("hansel server stopped");
    Ok(())
}
