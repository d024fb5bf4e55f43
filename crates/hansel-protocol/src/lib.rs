//! hansel-protocol: Wire protocol for hansel agent sessions
//!
//! This crate defines the framed binary protocol spoken between the server
//! and its agents over an SSH session channel, and between the operator CLI
//! and the server over the local control socket.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod sequence;

pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{ControlRequest, Message, MessageType, ResultMessage, StatusMessage, TaskMessage};
pub use sequence::{SequenceCheck, SequenceTracker};
