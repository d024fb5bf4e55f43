//! Session I/O loops and teardown

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use hansel_protocol::{FrameCodec, Message, SequenceCheck, SequenceTracker};

use super::SessionHandle;
use crate::state::ServerState;

/// Drive `session` over `stream` until the channel closes or fails
///
/// Registers the session, pushes the catalog tasks that target it, then
/// decodes inbound frames. Returns once teardown has finished: the outbound
/// queue is closed and drained and the registry entry is gone.
pub async fn run_session<S>(
    state: Arc<ServerState>,
    session: Arc<SessionHandle>,
    outbound: mpsc::Receiver<Message>,
    stream: S,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = FramedRead::new(reader, FrameCodec::new());
    let writer = FramedWrite::new(writer, FrameCodec::new());

    let drain = tokio::spawn(drain_outbound(Arc::clone(&session), outbound, writer));

    if session.activate() {
        state.registry.register(&session);
        tracing::info!(
            "{} active for client {} ({})",
            session.id(),
            session.client_name(),
            session.remote_address().unwrap_or("unknown address")
        );
        state.distributor.distribute_to(&session);
        read_inbound(&state, &session, &mut reader).await;
    }

    session.close();
    if let Err(e) = drain.await {
        tracing::error!("{} drain task failed: {}", session.id(), e);
    }
    state
        .registry
        .unregister(session.client_name(), session.id());
    session.mark_closed();
    tracing::info!("{} for client {} closed", session.id(), session.client_name());
}

async fn read_inbound<R>(
    state: &ServerState,
    session: &SessionHandle,
    reader: &mut FramedRead<R, FrameCodec>,
) where
    R: AsyncRead + Unpin,
{
    let cancel = session.cancel_token().clone();
    let mut sequences = SequenceTracker::new();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(message)) => {
                session.touch();
                dispatch(state, session, &mut sequences, message);
            }
            Some(Err(e)) if e.is_frame_corrupt() => {
                tracing::warn!("{}: corrupt frame ({}); closing", session.id(), e);
                break;
            }
            Some(Err(e)) => {
                tracing::warn!("{}: transport error ({}); closing", session.id(), e);
                break;
            }
            None => {
                tracing::debug!("{}: channel EOF", session.id());
                break;
            }
        }
    }
}

fn dispatch(
    state: &ServerState,
    session: &SessionHandle,
    sequences: &mut SequenceTracker,
    message: Message,
) {
    let name = session.client_name();

    match message {
        Message::Status(status) => {
            if status.client_name != name {
                tracing::debug!("{} reports itself as {}", name, status.client_name);
            }
            tracing::trace!("Status from {}: {}", name, status.text);
            state.registry.record_status(name, session.id(), &status.text);
        }

        Message::Result(result) => {
            match sequences.observe(result.sequence) {
                SequenceCheck::First | SequenceCheck::Next => {}
                SequenceCheck::Gap { missing } => tracing::warn!(
                    "{}: result {} skips {} sequence numbers",
                    name,
                    result.sequence,
                    missing
                ),
                SequenceCheck::Replay { highest } => tracing::debug!(
                    "{}: result {} repeats or precedes {}",
                    name,
                    result.sequence,
                    highest
                ),
            }
            tracing::info!(
                "Result for task {} from {} ({} outputs)",
                result.sequence,
                name,
                result.outputs.len()
            );
            for output in &result.outputs {
                tracing::debug!("{} task {}: {}", name, result.sequence, output.trim_end());
            }
            state.registry.record_result(name, session.id(), result);
        }

        other @ (Message::Task(_) | Message::ControlRequest(_)) => {
            tracing::warn!(
                "Ignoring {:?} message from agent {}",
                other.message_type(),
                name
            );
        }
    }
}

async fn drain_outbound<W>(
    session: Arc<SessionHandle>,
    mut outbound: mpsc::Receiver<Message>,
    mut writer: FramedWrite<W, FrameCodec>,
) where
    W: AsyncWrite + Unpin,
{
    let cancel = session.cancel_token().clone();

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = outbound.recv() => message,
        };
        let Some(message) = message else { break };

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = writer.send(message) => {
                if let Err(e) = result {
                    tracing::warn!("{}: write failed: {}", session.id(), e);
                    break;
                }
            }
        }
    }

    // A write failure must also stop the inbound loop
    session.close();

    outbound.close();
    let mut rejected = 0usize;
    while outbound.try_recv().is_ok() {
        rejected += 1;
    }
    if rejected > 0 {
        tracing::warn!(
            "{}: {} queued messages rejected at teardown",
            session.id(),
            rejected
        );
    }

    if let Err(e) = writer.close().await {
        tracing::debug!("{}: channel close failed: {}", session.id(), e);
    }
}
