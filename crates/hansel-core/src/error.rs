//! Core error types for hansel

use hansel_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the hansel ecosystem
#[derive(Error, Debug)]
pub enum HanselError {
    /// Protocol error (frame corrupt or codec I/O)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Identity store error
    #[error("Identity store error: {0}")]
    Store(#[from] StoreError),

    /// Task execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Key material error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Client pattern error
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The server did not admit our identity (unknown or pending approval)
    #[error("Authentication rejected")]
    AuthRejected,

    /// Host key verification failed
    #[error("Host key verification failed: expected {expected}, got {actual}")]
    HostKeyRejected { expected: String, actual: String },

    /// Connection attempt timed out
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Network-level failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors returned when handing a message to a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The outbound queue is saturated; the caller should drop or retry
    #[error("Outbound queue full ({capacity} messages pending)")]
    QueueFull { capacity: usize },

    /// The session is tearing down or gone
    #[error("Session closed")]
    Closed,
}

/// Identity store errors
///
/// Any of these fails the single authentication attempt that hit it.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Opening, reading or appending an identity file failed
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking store task did not complete
    #[error("Store task failed: {0}")]
    Task(String),

    /// The identity would not read back as the record it was written as
    #[error("Identity {user:?} cannot be stored as a record")]
    Unstorable { user: String },
}

/// Task execution errors that abort the rest of a task
#[derive(Error, Debug)]
pub enum ExecError {
    /// An action string contained no program
    #[error("Action {index} is empty")]
    EmptyAction { index: usize },

    /// The program could not be located or started
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Key material errors
#[derive(Error, Debug)]
pub enum KeyError {
    /// Loading a private key failed
    #[error("Failed to load key from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: russh_keys::Error,
    },

    /// Key generation failed
    #[error("Failed to generate Ed25519 key")]
    Generate,

    /// Encoding a key failed
    #[error("Failed to encode key: {0}")]
    Encode(#[source] russh_keys::Error),

    /// Writing a key file failed
    #[error("Failed to write key to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Client name pattern errors
#[derive(Error, Debug)]
pub enum PatternError {
    /// The pattern is not a valid regular expression
    #[error("Invalid client pattern '{pattern}': {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
