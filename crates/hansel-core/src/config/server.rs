//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_secs, option_duration_secs};
use crate::error::ConfigError;

/// Default SSH listen port
pub const DEFAULT_PORT: u16 = 62621;

/// Configuration for the server daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the SSH listener to
    pub bind_address: String,

    /// Path to the host key file (generated on first start)
    pub host_key_path: PathBuf,

    /// Identity file of authorized `user=fingerprint` records
    pub authorized_users_path: PathBuf,

    /// Identity file of pending `user=fingerprint` records
    pub pending_users_path: PathBuf,

    /// Unix socket for operator control queries
    pub control_socket_path: PathBuf,

    /// Directory of `*.yml` task definitions
    pub tasks_dir: PathBuf,

    /// Task files larger than this are ignored
    pub max_task_file_size: u64,

    /// Bounded outbound queue length per session
    pub outbound_queue_capacity: usize,

    /// Close sessions with no inbound traffic for this long (disabled if unset)
    #[serde(
        default,
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,

    /// Delay before answering a rejected authentication attempt
    #[serde(with = "duration_secs")]
    pub auth_rejection_time: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            host_key_path: config_dir.join("host_key"),
            authorized_users_path: config_dir.join("authorized_users"),
            pending_users_path: config_dir.join("pending_users"),
            control_socket_path: config_dir.join("control.sock"),
            tasks_dir: config_dir.join("tasks"),
            max_task_file_size: 1024 * 1024,
            outbound_queue_capacity: 100,
            idle_timeout: None,
            auth_rejection_time: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "server.outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid(
                "server.idle_timeout must be at least 1 second when set".to_string(),
            ));
        }
        Ok(())
    }
}
