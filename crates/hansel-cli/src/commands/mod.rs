//! CLI command implementations

mod client;
mod control;
mod serve;

pub use client::{client_command, resolve_server_address};
pub use control::control_command;
pub use serve::serve_command;

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use hansel_core::config::{self, HanselConfig};

/// Load the configuration file
///
/// An explicit `--config` path must load. Without one, the default path is
/// used when it exists and a broken default file falls back to defaults
/// with a warning.
pub fn load_settings(explicit: Option<&Path>) -> Result<HanselConfig> {
    if let Some(path) = explicit {
        return HanselConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if !default_path.exists() {
        tracing::info!("Using default configuration");
        return Ok(HanselConfig::default());
    }

    Ok(HanselConfig::load(&default_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
        HanselConfig::default()
    }))
}

/// Cancel the returned token on Ctrl+C or SIGTERM
pub fn shutdown_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        token.cancel();
    });

    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_explicit_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nbind_address = \"127.0.0.1:9000\"\n").unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.server.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_explicit_invalid_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nstatus_interval = 0\n").unwrap();

        let err = load_settings(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("status_interval"));
    }
}
