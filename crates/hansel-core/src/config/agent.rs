//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::server::DEFAULT_PORT;
use crate::error::ConfigError;

/// Configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Server address to dial (`host:port`)
    pub server_address: String,

    /// Path to the private key for authentication (generated if missing)
    pub private_key_path: PathBuf,

    /// Expected server host key fingerprint; any key is accepted if unset
    pub server_host_key: Option<String>,

    /// SSH user name, which is also the client name on the server
    pub username: String,

    /// Interval between `Status` keepalives
    #[serde(with = "duration_secs")]
    pub status_interval: Duration,

    /// Connection timeout for one dial attempt
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: format!("localhost:{}", DEFAULT_PORT),
            private_key_path: super::default_config_dir().join("id_ed25519"),
            server_host_key: None,
            username: gethostname::gethostname().to_string_lossy().into_owned(),
            status_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "agent.status_interval must be at least 1 second".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "agent.connect_timeout must be at least 1 second".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Reject backoff settings that cannot produce a delay sequence
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.is_zero() {
            return Err(ConfigError::Invalid(
                "agent.backoff.initial must be at least 1 second".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(ConfigError::Invalid(
                "agent.backoff.max must not be below agent.backoff.initial".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "agent.backoff.multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "agent.backoff.jitter must be between 0 and 1, got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}
