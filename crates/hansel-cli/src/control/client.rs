//! Control socket client

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use hansel_core::control::{refusal_reason, ControlRecord};
use hansel_core::ClientPattern;
use hansel_protocol::{ControlRequest, FrameCodec, Message};

/// Upper bound on a whole query exchange
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a running server's control socket
pub struct ControlClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    /// Create a client for the socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Ask the server for every registered client matching `pattern`
    pub async fn query(&self, pattern: &ClientPattern) -> Result<Vec<ControlRecord>> {
        tracing::debug!("Connecting to control socket {:?}", self.socket_path);

        let stream = UnixStream::connect(&self.socket_path).await.with_context(|| {
            format!(
                "Failed to connect to control socket {:?}. Is the server running?",
                self.socket_path
            )
        })?;

        tokio::time::timeout(self.timeout, query_stream(stream, pattern))
            .await
            .with_context(|| format!("Control query timed out after {:?}", self.timeout))?
    }
}

/// Run one control exchange over an already connected stream
///
/// The server closes the stream after the last record, so the exchange ends
/// at EOF. A refusal `Status` from the server becomes an error.
pub async fn query_stream<S>(stream: S, pattern: &ClientPattern) -> Result<Vec<ControlRecord>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::new());

    framed
        .send(Message::ControlRequest(ControlRequest {
            pattern: pattern.as_str().to_string(),
        }))
        .await
        .context("Failed to send control request")?;

    let mut records = Vec::new();
    while let Some(frame) = framed.next().await {
        match frame.context("Failed to read control response")? {
            Message::Result(result) => records.push(ControlRecord::from(result)),
            Message::Status(status) => match refusal_reason(&status) {
                Some(reason) => bail!("Server refused query: {}", reason),
                None => {
                    tracing::debug!("Ignoring status from {}: {}", status.client_name, status.text)
                }
            },
            other => {
                tracing::warn!("Unexpected {:?} frame on control socket", other.message_type());
            }
        }
    }

    Ok(records)
}
