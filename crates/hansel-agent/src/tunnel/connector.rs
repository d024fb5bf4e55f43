//! Outbound SSH connector
//!
//! Dials the server, authenticates with the agent's key and opens the one
//! session channel that carries the framed protocol.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Msg};
use russh::ChannelStream;
use russh_keys::key::{KeyPair, PublicKey};

use hansel_core::config::AgentConfig;
use hansel_core::error::{ConnectionError, KeyError};
use hansel_core::keys::{fingerprint, load_or_generate_key};

use crate::supervisor::{Dialer, Link};

/// Dials the server over SSH
pub struct SshDialer {
    /// Agent configuration
    config: AgentConfig,
    /// Private key for authentication
    key: Arc<KeyPair>,
}

impl SshDialer {
    /// Create a dialer, loading (or generating on first run) the agent key
    pub fn new(config: AgentConfig) -> Result<Self, KeyError> {
        let key = load_or_generate_key(&config.private_key_path)?;
        Ok(Self {
            config,
            key: Arc::new(key),
        })
    }

    /// Fingerprint an administrator approves for this agent
    pub fn fingerprint(&self) -> Option<String> {
        self.key.clone_public_key().ok().map(|k| fingerprint(&k))
    }
}

#[async_trait]
impl Dialer for SshDialer {
    type Stream = Pin<Box<ChannelStream<Msg>>>;

    async fn dial(&self) -> Result<Link<Self::Stream>, ConnectionError> {
        let address = &self.config.server_address;
        let handler = HostKeyCheck::new(self.config.server_host_key.clone());

        tracing::debug!("Connecting to {}", address);
        let mut session = tokio::time::timeout(
            self.config.connect_timeout,
            client::connect(Arc::new(Config::default()), address.as_str(), handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(address.clone()))?
        .map_err(|e| match e.downcast::<ConnectionError>() {
            Ok(rejected) => rejected,
            Err(e) => {
                ConnectionError::Transport(format!("Failed to connect to {}: {}", address, e))
            }
        })?;

        tracing::debug!("Authenticating as user '{}'", self.config.username);
        let authenticated = session
            .authenticate_publickey(self.config.username.as_str(), Arc::clone(&self.key))
            .await
            .map_err(|e| ConnectionError::Transport(format!("Authentication error: {}", e)))?;

        if !authenticated {
            return Err(ConnectionError::AuthRejected);
        }

        tracing::debug!("Authentication successful, opening channel");
        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::Transport(format!("Failed to open channel: {}", e)))?;

        Ok(Link {
            stream: Box::pin(channel.into_stream()),
            guard: Box::new(session),
        })
    }

    fn describe(&self) -> String {
        self.config.server_address.clone()
    }
}

/// SSH client handler: verifies the server host key
struct HostKeyCheck {
    /// Expected host key fingerprint; any key is accepted when unset
    expected: Option<String>,
}

impl HostKeyCheck {
    fn new(expected: Option<String>) -> Self {
        Self { expected }
    }
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = fingerprint(server_public_key);
        tracing::debug!("Server host key: {}", actual);

        match &self.expected {
            Some(expected) if *expected != actual => {
                Err(ConnectionError::HostKeyRejected {
                    expected: expected.clone(),
                    actual,
                }
                .into())
            }
            Some(_) => {
                tracing::debug!("Host key verified against configured fingerprint");
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;

    #[tokio::test]
    async fn test_host_key_mismatch_is_rejected() {
        let key = KeyPair::generate_ed25519().unwrap();
        let public = key.clone_public_key().unwrap();

        let mut pinned = HostKeyCheck::new(Some(fingerprint(&public)));
        assert!(pinned.check_server_key(&public).await.unwrap());

        let mut wrong = HostKeyCheck::new(Some("SHA256:nope".to_string()));
        let err = wrong.check_server_key(&public).await.unwrap_err();
        assert!(matches!(
            err.downcast::<ConnectionError>(),
            Ok(ConnectionError::HostKeyRejected { .. })
        ));

        let mut open = HostKeyCheck::new(None);
        assert!(open.check_server_key(&public).await.unwrap());
    }

    #[test]
    fn test_dialer_generates_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            private_key_path: dir.path().join("id_ed25519"),
            ..AgentConfig::default()
        };
        let dialer = SshDialer::new(config).unwrap();
        assert!(dir.path().join("id_ed25519").exists());
        assert!(dialer.fingerprint().unwrap().starts_with("SHA256:"));
    }
}
