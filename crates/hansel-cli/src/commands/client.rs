//! Client (agent) command implementation

use anyhow::Result;

use hansel_core::config::{AgentConfig, DEFAULT_PORT};

use super::shutdown_on_signal;

/// Combine the configured server address with `--host` / `--port` overrides
///
/// The configured address is split on its last `:`; whichever half is not
/// overridden is kept. A configured address without a port uses the default.
pub fn resolve_server_address(configured: &str, host: Option<&str>, port: Option<u16>) -> String {
    let (configured_host, configured_port) = match configured.rsplit_once(':') {
        Some((h, p)) => (h, p.parse().unwrap_or(DEFAULT_PORT)),
        None => (configured, DEFAULT_PORT),
    };

    format!(
        "{}:{}",
        host.unwrap_or(configured_host),
        port.unwrap_or(configured_port)
    )
}

/// Run the agent until a shutdown signal arrives
pub async fn client_command(
    mut config: AgentConfig,
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
) -> Result<()> {
    config.server_address = resolve_server_address(&config.server_address, host.as_deref(), port);
    if let Some(name) = name {
        config.username = name;
    }

    tracing::info!(
        "hansel agent '{}' connecting to {}",
        config.username,
        config.server_address
    );
    let cancel = shutdown_on_signal();
    hansel_agent::run_agent(config, cancel).await?;
    tracing::info!("hansel agent stopped");
    Ok(())
}
