//! SSH client handler implementation
//!
//! Implements the russh server handler for agent connections: public-key
//! authentication goes through the [`Authenticator`], and the first session
//! channel an admitted agent opens becomes its [`SessionHandle`]'s transport.
//!
//! [`Authenticator`]: crate::auth::Authenticator
//! [`SessionHandle`]: crate::session::SessionHandle

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::key::{KeyPair, PublicKey};

use hansel_core::keys::fingerprint;
use hansel_core::{Identity, SessionState};

use crate::auth::AuthDecision;
use crate::session::run_session;
use crate::state::ServerState;

/// Handler for a single SSH client connection
pub struct ClientHandler {
    /// Shared server state
    state: Arc<ServerState>,
    /// Peer address of the connecting client
    peer_addr: Option<SocketAddr>,
    /// Handshake progress (until a session takes over)
    handshake: SessionState,
    /// Identity admitted by public-key auth
    identity: Option<Identity>,
    /// Channel carrying the session, once opened
    channel: Option<ChannelId>,
}

impl ClientHandler {
    /// Create a handler for a new transport connection
    pub fn new(state: Arc<ServerState>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer_addr,
            handshake: SessionState::Connecting,
            identity: None,
            channel: None,
        }
    }

    fn peer(&self) -> String {
        self.peer_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Handle public key authentication
    ///
    /// The SSH user becomes the client name. Unknown identities are recorded
    /// as pending and refused until an administrator approves them.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.handshake = SessionState::Authenticating;
        let identity = Identity::new(user, fingerprint(public_key));

        tracing::info!("Auth attempt from {} as {}", self.peer(), identity);

        match self.state.authenticator.authenticate(identity.clone()).await {
            AuthDecision::Admit => {
                self.handshake = SessionState::Admitted;
                self.identity = Some(identity);
                Ok(Auth::Accept)
            }
            AuthDecision::Pending => {
                tracing::warn!(
                    "Authentication REJECTED for {} from {}: awaiting approval",
                    identity,
                    self.peer()
                );
                self.handshake = SessionState::Rejected;
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
            AuthDecision::Reject => {
                tracing::warn!(
                    "Authentication REJECTED for {} from {}",
                    identity,
                    self.peer()
                );
                self.handshake = SessionState::Rejected;
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    /// Handle channel open request
    ///
    /// Only the first session channel is accepted; it carries the framed
    /// protocol for the lifetime of the connection.
    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (SessionState::Admitted, Some(identity)) = (self.handshake, self.identity.clone())
        else {
            tracing::warn!("Channel open before authentication from {}", self.peer());
            return Ok(false);
        };
        if self.channel.is_some() {
            tracing::warn!("Refusing extra channel from {}", identity.user);
            return Ok(false);
        }

        let channel_id = channel.id();
        tracing::debug!("Channel opened: {:?} for {}", channel_id, identity.user);
        self.channel = Some(channel_id);

        let remote = self.peer_addr.map(|a| a.to_string());
        let (session, outbound) = self.state.new_session(identity, remote);
        let state = Arc::clone(&self.state);
        let stream = Box::pin(channel.into_stream());
        tokio::spawn(run_session(state, session, outbound, stream));

        Ok(true)
    }

    /// Handle channel close
    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        Ok(())
    }

    /// Handle channel EOF
    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        Ok(())
    }
}

/// russh configuration for the SSH listener
#[derive(Clone)]
pub struct SshConfig {
    /// russh server configuration
    pub ssh_config: Arc<russh::server::Config>,
}

impl SshConfig {
    /// Create a new server configuration with the given host key
    pub fn new(host_key: KeyPair, auth_rejection_time: Duration) -> Self {
        let config = russh::server::Config {
            keys: vec![host_key],
            auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            methods: russh::MethodSet::PUBLICKEY,
            ..Default::default()
        };

        Self {
            ssh_config: Arc::new(config),
        }
    }
}
