//! Control socket server

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use hansel_core::control::refusal;
use hansel_core::ClientPattern;
use hansel_protocol::{FrameCodec, Message, ProtocolError};

use crate::registry::ClientRegistry;

/// How long a control client may take to send its request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind the control socket at `path`
///
/// A stale socket file from a previous run is removed first. The socket is
/// made readable and writable by the owner only.
pub fn bind_control_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }

    if path.exists() {
        tracing::debug!("Removing stale control socket {:?}", path);
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {:?}", path))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind control socket {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {:?}", path))?;
    }

    Ok(listener)
}

/// Serves control queries against the registry
pub struct ControlServer {
    path: PathBuf,
    registry: Arc<ClientRegistry>,
    cancel: CancellationToken,
}

impl ControlServer {
    /// Create a control server for the socket at `path`
    pub fn new(path: PathBuf, registry: Arc<ClientRegistry>, cancel: CancellationToken) -> Self {
        Self {
            path,
            registry,
            cancel,
        }
    }

    /// Accept control connections until cancelled
    pub async fn run(self, listener: UnixListener) -> Result<()> {
        tracing::info!("Control socket listening on {:?}", self.path);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Control server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let registry = Arc::clone(&self.registry);
                            tokio::spawn(async move {
                                match answer_query(stream, &registry).await {
                                    Ok(count) => tracing::debug!("Answered with {} records", count),
                                    Err(e) => tracing::warn!("Control client error: {}", e),
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept control connection: {}", e);
                        }
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove control socket {:?}: {}", self.path, e);
        }
        Ok(())
    }
}

/// Answer one control exchange on `stream`
///
/// Reads a single `ControlRequest`, writes one `Result` record per matching
/// client and closes the stream. An invalid pattern or unexpected message
/// gets a single refusal `Status` instead. Returns the number of records
/// written.
pub async fn answer_query<S>(stream: S, registry: &ClientRegistry) -> Result<usize, ProtocolError>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = FramedRead::new(reader, FrameCodec::new());
    let mut writer = FramedWrite::new(writer, FrameCodec::new());

    let request = match tokio::time::timeout(REQUEST_TIMEOUT, reader.next()).await {
        Ok(Some(frame)) => frame?,
        Ok(None) => return Ok(0),
        Err(_) => {
            writer
                .send(Message::Status(refusal("no request received")))
                .await?;
            writer.close().await?;
            return Ok(0);
        }
    };

    let pattern = match request {
        Message::ControlRequest(request) => ClientPattern::new(&request.pattern),
        other => {
            let reason = format!("expected a control request, got {:?}", other.message_type());
            writer.send(Message::Status(refusal(reason))).await?;
            writer.close().await?;
            return Ok(0);
        }
    };

    let pattern = match pattern {
        Ok(pattern) => pattern,
        Err(e) => {
            tracing::debug!("Refusing control query: {}", e);
            writer.send(Message::Status(refusal(e))).await?;
            writer.close().await?;
            return Ok(0);
        }
    };

    let snapshots = registry.find(&pattern);
    tracing::debug!("Control query '{}' matched {} clients", pattern, snapshots.len());
    for snapshot in &snapshots {
        writer.feed(Message::Result(snapshot.to_record())).await?;
    }
    writer.close().await?;
    Ok(snapshots.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hansel_core::control::{refusal_reason, ControlRecord};
    use hansel_core::{Identity, SessionId};
    use hansel_protocol::ControlRequest;

    use crate::session::SessionHandle;

    async fn query(registry: &ClientRegistry, request: Message) -> Vec<Message> {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let mut writer = FramedWrite::new(client_write, FrameCodec::new());
        let mut reader = FramedRead::new(client_read, FrameCodec::new());

        writer.send(request).await.unwrap();
        answer_query(server, registry).await.unwrap();

        let mut replies = Vec::new();
        while let Some(frame) = reader.next().await {
            replies.push(frame.unwrap());
        }
        replies
    }

    fn control(pattern: &str) -> Message {
        Message::ControlRequest(ControlRequest {
            pattern: pattern.to_string(),
        })
    }

    #[tokio::test]
    async fn test_query_returns_matching_records() {
        let registry = ClientRegistry::new();
        let mut keep = Vec::new();
        for (id, name) in [(1, "web-1"), (2, "web-2"), (3, "db-1")] {
            let (handle, rx) = SessionHandle::new(
                SessionId::new(id),
                Identity::new(name, "fp"),
                None,
                4,
                CancellationToken::new(),
            );
            let handle = Arc::new(handle);
            handle.activate();
            registry.register(&handle);
            keep.push((handle, rx));
        }
        registry.record_status("web-1", SessionId::new(1), "keepalive");

        let replies = query(&registry, control("web-.*")).await;
        let records: Vec<ControlRecord> = replies
            .into_iter()
            .map(|m| match m {
                Message::Result(r) => ControlRecord::from(r),
                other => panic!("unexpected reply {:?}", other),
            })
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].client_name, "web-1");
        assert_eq!(records[0].status, "keepalive");
        assert_eq!(records[1].client_name, "web-2");
        assert_eq!(records[1].last_sequence, 0);
    }

    #[tokio::test]
    async fn test_empty_match_is_empty_response() {
        let registry = ClientRegistry::new();
        assert!(query(&registry, control("nobody")).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_refused() {
        let registry = ClientRegistry::new();
        let replies = query(&registry, control("web-(")).await;
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Message::Status(status) => assert!(refusal_reason(status).is_some()),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_message_kind_is_refused() {
        let registry = ClientRegistry::new();
        let replies = query(&registry, Message::status("alice", "keepalive")).await;
        assert!(matches!(&replies[..], [Message::Status(s)] if s.text.starts_with("error: ")));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        std::fs::write(&path, b"stale").unwrap();

        let _listener = bind_control_socket(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
