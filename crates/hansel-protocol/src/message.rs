//! Message types for the hansel protocol
//!
//! The protocol is a closed set of four message kinds. Each kind has its own
//! payload struct; the frame header carries a type tag so the decoder knows
//! which shape to deserialize before any business logic sees the message.
//!
//! # Message Flow
//!
//! 1. Agent connects over SSH and opens one session channel
//! 2. Server pushes `Task` messages for every loaded task targeting the agent
//! 3. Agent runs the task and answers with a `Result` carrying the same sequence
//! 4. Agent sends a `Status` keepalive on a fixed interval
//! 5. Operators send a single `ControlRequest` over the control socket and
//!    receive one `Result` record per matching client

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Message type identifier (the frame's type tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Command batch (server → agent)
    Task = 0x01,
    /// Command output (agent → server, server → operator)
    Result = 0x02,
    /// Liveness report (agent → server)
    Status = 0x03,
    /// Pattern query (operator → server)
    ControlRequest = 0x04,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Task),
            0x02 => Some(Self::Result),
            0x03 => Some(Self::Status),
            0x04 => Some(Self::ControlRequest),
            _ => None,
        }
    }
}

/// A batch of shell actions for the targeted clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Sequence number of the task definition
    pub sequence: u64,
    /// Task kind, e.g. "command"
    pub kind: String,
    /// Actions to run in order
    pub actions: Vec<String>,
    /// Client name patterns this task was addressed to
    pub targets: BTreeSet<String>,
}

/// Outputs of a task run, or a control query record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Sequence number of the task this answers
    pub sequence: u64,
    /// Name of the reporting client
    pub client_name: String,
    /// One entry per action, in action order
    pub outputs: Vec<String>,
}

/// Keepalive / liveness report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Name of the reporting client
    pub client_name: String,
    /// Free-form status text
    pub text: String,
}

/// Operator query over client names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Regular expression matched against whole client names
    pub pattern: String,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Task(TaskMessage),
    Result(ResultMessage),
    Status(StatusMessage),
    ControlRequest(ControlRequest),
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Task(_) => MessageType::Task,
            Message::Result(_) => MessageType::Result,
            Message::Status(_) => MessageType::Status,
            Message::ControlRequest(_) => MessageType::ControlRequest,
        }
    }

    /// Serialize the payload (without header)
    pub fn encode_payload(&self) -> Result<Vec<u8>, bincode::Error> {
        match self {
            Message::Task(m) => bincode::serialize(m),
            Message::Result(m) => bincode::serialize(m),
            Message::Status(m) => bincode::serialize(m),
            Message::ControlRequest(m) => bincode::serialize(m),
        }
    }

    /// Deserialize a payload into the shape named by `message_type`
    pub fn decode_payload(
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Self, bincode::Error> {
        Ok(match message_type {
            MessageType::Task => Message::Task(bincode::deserialize(payload)?),
            MessageType::Result => Message::Result(bincode::deserialize(payload)?),
            MessageType::Status => Message::Status(bincode::deserialize(payload)?),
            MessageType::ControlRequest => Message::ControlRequest(bincode::deserialize(payload)?),
        })
    }

    /// Convenience constructor for a status message
    pub fn status(client_name: impl Into<String>, text: impl Into<String>) -> Self {
        Message::Status(StatusMessage {
            client_name: client_name.into(),
            text: text.into(),
        })
    }
}

impl From<TaskMessage> for Message {
    fn from(m: TaskMessage) -> Self {
        Message::Task(m)
    }
}

impl From<ResultMessage> for Message {
    fn from(m: ResultMessage) -> Self {
        Message::Result(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for msg_type in [
            MessageType::Task,
            MessageType::Result,
            MessageType::Status,
            MessageType::ControlRequest,
        ] {
            let byte = msg_type.as_u8();
            let recovered = MessageType::from_u8(byte).unwrap();
            assert_eq!(recovered, msg_type);
        }
        assert_eq!(MessageType::from_u8(0x00), None);
        assert_eq!(MessageType::from_u8(0xFF), None);
    }

    #[test]
    fn test_payload_decodes_by_tag() {
        let msg = Message::status("alice", "keepalive");
        let payload = msg.encode_payload().unwrap();
        let decoded = Message::decode_payload(MessageType::Status, &payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_payload_with_wrong_tag_fails() {
        let msg = Message::ControlRequest(ControlRequest {
            pattern: "web-.*".to_string(),
        });
        let payload = msg.encode_payload().unwrap();
        // A Result payload needs more fields than a bare pattern string holds
        assert!(Message::decode_payload(MessageType::Result, &payload).is_err());
    }
}
