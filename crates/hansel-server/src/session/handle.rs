//! Shared handle to one live session

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use hansel_core::error::SessionError;
use hansel_core::time::current_time_millis;
use hansel_core::{Identity, SessionId, SessionState};
use hansel_protocol::Message;

/// Handle to an admitted session
///
/// The connection task owns the session; the registry and producers hold
/// references to this handle and talk to the session only through [`send`]
/// and [`close`].
///
/// [`send`]: SessionHandle::send
/// [`close`]: SessionHandle::close
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    identity: Identity,
    remote_address: Option<String>,
    connected_at: u64,
    last_seen: AtomicU64,
    state: Mutex<SessionState>,
    outbound: mpsc::Sender<Message>,
    capacity: usize,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its outbound queue
    ///
    /// `cancel` is usually a child of the server shutdown token.
    pub fn new(
        id: SessionId,
        identity: Identity,
        remote_address: Option<String>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Message>) {
        let capacity = capacity.max(1);
        let (outbound, rx) = mpsc::channel(capacity);
        let now = current_time_millis();
        let handle = Self {
            id,
            identity,
            remote_address,
            connected_at: now,
            last_seen: AtomicU64::new(now),
            state: Mutex::new(SessionState::Admitted),
            outbound,
            capacity,
            cancel,
        };
        (handle, rx)
    }

    /// Session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Registry key: the SSH user the agent authenticated as
    pub fn client_name(&self) -> &str {
        &self.identity.user
    }

    /// Admitted identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Peer address of the transport connection
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    /// When the session was admitted (ms since epoch)
    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    /// Last inbound traffic (ms since epoch)
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    /// Record inbound traffic
    pub fn touch(&self) {
        self.last_seen
            .store(current_time_millis(), Ordering::Relaxed);
    }

    /// Outbound queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session is registered and not tearing down
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Move `Admitted → Active`; false if teardown already started
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Admitted {
            *state = SessionState::Active;
            true
        } else {
            false
        }
    }

    /// Enqueue a message without waiting
    ///
    /// Fails with `QueueFull` when the queue is saturated and `Closed` once
    /// teardown has started. A message that was accepted is delivered unless
    /// the transport fails.
    pub fn send(&self, message: Message) -> Result<(), SessionError> {
        if matches!(self.state(), SessionState::Closing | SessionState::Closed) {
            return Err(SessionError::Closed);
        }
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Start teardown
    ///
    /// Idempotent; returns true only for the call that moved the session
    /// into `Closing`.
    pub fn close(&self) -> bool {
        let started = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                SessionState::Closing | SessionState::Closed => false,
                _ => {
                    *state = SessionState::Closing;
                    true
                }
            }
        };
        self.cancel.cancel();
        if started {
            tracing::debug!("{} ({}) closing", self.id, self.client_name());
        }
        started
    }

    /// Mark teardown finished
    pub fn mark_closed(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SessionState::Closed;
    }

    /// Token cancelled when the session starts closing
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
