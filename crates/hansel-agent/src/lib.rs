//! hansel-agent: fleet agent
//!
//! The agent dials the server over SSH, runs the command tasks pushed to it
//! and reports results and periodic status. The connection is supervised:
//! any failure is followed by an exponential backoff and a new dial.

pub mod executor;
pub mod supervisor;
pub mod tunnel;

pub use executor::CommandExecutor;
pub use supervisor::{Dialer, Link, ReconnectSupervisor, SupervisorState};
pub use tunnel::{ExponentialBackoff, SshDialer};

use tokio_util::sync::CancellationToken;

use hansel_core::config::AgentConfig;
use hansel_core::HanselError;

/// Run the agent against the configured server until `cancel` fires
///
/// Invalid settings and unusable key material are reported before the first
/// dial; connection failures after that are retried forever.
pub async fn run_agent(config: AgentConfig, cancel: CancellationToken) -> Result<(), HanselError> {
    config.validate()?;
    let dialer = SshDialer::new(config.clone())?;
    if let Some(fingerprint) = dialer.fingerprint() {
        tracing::info!(
            "Agent identity: {}={} (add to the server's authorized users)",
            config.username,
            fingerprint
        );
    }

    ReconnectSupervisor::new(dialer, &config).run(cancel).await;
    Ok(())
}
