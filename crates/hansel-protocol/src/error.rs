//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
///
/// Every variant except `Io` means the byte stream can no longer be trusted
/// to be aligned on a frame boundary.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown message type tag
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload bytes did not decode as the tagged message shape
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error indicates a corrupt frame (stream desync)
    /// rather than a transport failure.
    pub fn is_frame_corrupt(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}
