//! Global server state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hansel_core::config::ServerConfig;
use hansel_core::{HanselError, Identity, SessionId};
use hansel_protocol::Message;

use crate::auth::{Authenticator, IdentityStore};
use crate::distributor::{TaskCatalog, TaskDistributor};
use crate::registry::ClientRegistry;
use crate::session::SessionHandle;

/// Shared state for the server daemon
///
/// Passed explicitly to every component that needs it; there is no global.
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Admission decisions
    pub authenticator: Authenticator,
    /// Active clients
    pub registry: Arc<ClientRegistry>,
    /// Task fan-out
    pub distributor: TaskDistributor,
    /// Cancelled on process shutdown; parent of every session token
    pub shutdown: CancellationToken,
    next_session_id: AtomicU64,
}

impl ServerState {
    /// Assemble state from already-opened parts
    pub fn new(config: ServerConfig, store: IdentityStore, catalog: TaskCatalog) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        Self {
            config,
            authenticator: Authenticator::new(Arc::new(store)),
            distributor: TaskDistributor::new(Arc::clone(&registry), Arc::new(catalog)),
            registry,
            shutdown: CancellationToken::new(),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Open the identity files and load the task directory named in `config`
    ///
    /// Missing identity files and a missing task directory are created.
    pub fn open(config: ServerConfig) -> Result<Self, HanselError> {
        let store = IdentityStore::open(&config.authorized_users_path, &config.pending_users_path)?;

        if !config.tasks_dir.exists() {
            tracing::info!("Creating task directory {:?}", config.tasks_dir);
            std::fs::create_dir_all(&config.tasks_dir)?;
        }
        let catalog = TaskCatalog::load(&config.tasks_dir, config.max_task_file_size)?;

        Ok(Self::new(config, store, catalog))
    }

    /// Use `shutdown` as the process shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Allocate the next session ID
    pub fn next_session_id(&self) -> SessionId {
        SessionId::new(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a session handle for an admitted identity
    pub fn new_session(
        &self,
        identity: Identity,
        remote_address: Option<String>,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<Message>) {
        let (handle, rx) = SessionHandle::new(
            self.next_session_id(),
            identity,
            remote_address,
            self.config.outbound_queue_capacity,
            self.shutdown.child_token(),
        );
        (Arc::new(handle), rx)
    }
}
