//! Control side-channel record format
//!
//! The control socket speaks the regular frame protocol: the operator sends
//! one `ControlRequest`, the server answers with one `Result` frame per
//! matching client and closes the stream. A rejected request is answered
//! with a single `Status` frame whose text starts with [`ERROR_PREFIX`].

use serde::{Deserialize, Serialize};

use hansel_protocol::{ResultMessage, StatusMessage};

/// Prefix of the status text the server sends when refusing a query
pub const ERROR_PREFIX: &str = "error: ";

/// Client name the server uses for its own status frames
pub const SERVER_NAME: &str = "hansel-server";

/// One control query answer row, decoded from a `Result` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRecord {
    /// Client name
    pub client_name: String,
    /// Sequence of the last result (0 if none yet)
    pub last_sequence: u64,
    /// Last status text (empty if none yet)
    pub status: String,
    /// Outputs of the last result
    pub outputs: Vec<String>,
}

impl From<ResultMessage> for ControlRecord {
    fn from(message: ResultMessage) -> Self {
        let mut outputs = message.outputs.into_iter();
        let status = outputs.next().unwrap_or_default();
        Self {
            client_name: message.client_name,
            last_sequence: message.sequence,
            status,
            outputs: outputs.collect(),
        }
    }
}

/// Build the status frame body that refuses a control query
pub fn refusal(reason: impl std::fmt::Display) -> StatusMessage {
    StatusMessage {
        client_name: SERVER_NAME.to_string(),
        text: format!("{}{}", ERROR_PREFIX, reason),
    }
}

/// Extract the refusal reason from a server status frame, if it is one
pub fn refusal_reason(status: &StatusMessage) -> Option<&str> {
    status.text.strip_prefix(ERROR_PREFIX)
}
