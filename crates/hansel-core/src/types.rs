//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use hansel_protocol::ResultMessage;

/// The (user, key fingerprint) pair used for admission decisions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// SSH user name the agent authenticated as
    pub user: String,
    /// Public key fingerprint, `SHA256:<base64>`
    pub fingerprint: String,
}

impl Identity {
    /// Create a new identity
    pub fn new(user: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Whether the identity can be stored as a line record and read back
    ///
    /// The user must be non-empty, must not start with `#`, and may not
    /// contain `=`, whitespace or control characters. The fingerprint must
    /// be non-empty with no whitespace or control characters.
    pub fn is_well_formed(&self) -> bool {
        let clean = |s: &str| {
            !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c.is_control())
        };
        clean(&self.user)
            && clean(&self.fingerprint)
            && !self.user.contains('=')
            && !self.user.starts_with('#')
    }

    /// Render as an identity-store line record (without newline)
    pub fn to_record(&self) -> String {
        format!("{}={}", self.user, self.fingerprint)
    }

    /// Parse a `user=fingerprint` line record
    ///
    /// Whitespace around either field is ignored. Returns None for lines
    /// without a separator or with an empty user.
    pub fn parse_record(line: &str) -> Option<Self> {
        let (user, fingerprint) = line.split_once('=')?;
        let user = user.trim();
        if user.is_empty() {
            return None;
        }
        Some(Self::new(user, fingerprint.trim()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user, self.fingerprint)
    }
}

/// Server-local identifier for one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Session lifecycle state
///
/// `Connecting → Authenticating → {Rejected | Admitted} → Active → Closing → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Transport accepted, handshake not started
    Connecting,
    /// Public key offered, admission being decided
    Authenticating,
    /// Admission refused (terminal)
    Rejected,
    /// Admission granted, channel not yet open
    Admitted,
    /// Registered and exchanging messages
    Active,
    /// Teardown in progress
    Closing,
    /// Teardown finished (terminal)
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Rejected => "rejected",
            SessionState::Admitted => "admitted",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of a registered client's state
///
/// Snapshots are what control queries read, so they never touch a live
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    /// Registry key
    pub client_name: String,
    /// Session currently bound to the name
    pub session_id: SessionId,
    /// Peer address of the transport connection
    pub remote_address: Option<String>,
    /// When the session registered (ms since epoch)
    pub connected_at: u64,
    /// Last inbound traffic (ms since epoch)
    pub last_seen: u64,
    /// Text of the last `Status` received
    pub last_status: Option<String>,
    /// Last `Result` received
    pub last_result: Option<ResultMessage>,
}

impl ClientSnapshot {
    /// Render as a control-query record
    ///
    /// `outputs[0]` is the last status text (empty if none); the remaining
    /// entries are the outputs of the last result. `sequence` is the last
    /// result's sequence, or 0.
    pub fn to_record(&self) -> ResultMessage {
        let mut outputs = vec![self.last_status.clone().unwrap_or_default()];
        let mut sequence = 0;
        if let Some(result) = &self.last_result {
            sequence = result.sequence;
            outputs.extend(result.outputs.iter().cloned());
        }
        ResultMessage {
            sequence,
            client_name: self.client_name.clone(),
            outputs,
        }
    }
}
