//! Reconnect supervisor
//!
//! Keeps exactly one connection to the server alive:
//!
//! ```text
//! Idle → Dialing → Connected → BackoffWait → Dialing → ...
//! ```
//!
//! While connected it runs an inbound loop (tasks in, results out), a
//! periodic status emitter and a writer draining the outbound queue. Any
//! read or write failure ends the connection and the supervisor backs off
//! before dialing again. There is no retry limit.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use hansel_core::config::AgentConfig;
use hansel_core::error::ConnectionError;
use hansel_protocol::{FrameCodec, Message, SequenceCheck, SequenceTracker};

use crate::executor::CommandExecutor;
use crate::tunnel::ExponentialBackoff;

/// Outbound queue length while connected
const OUTBOUND_CAPACITY: usize = 64;

/// Floor for the keepalive period; a zero interval cannot tick
const MIN_STATUS_INTERVAL: Duration = Duration::from_millis(10);

/// Status text sent on every keepalive tick
pub const KEEPALIVE_TEXT: &str = "keepalive";

/// A dialed connection: the byte stream plus whatever keeps it open
pub struct Link<S> {
    /// Framed protocol stream
    pub stream: S,
    /// Dropped when the connection ends (e.g. the SSH session handle)
    pub guard: Box<dyn Any + Send>,
}

impl<S> Link<S> {
    /// A link with nothing to keep alive besides the stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            guard: Box::new(()),
        }
    }
}

/// Opens connections to the server
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Stream type carried by a connection
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Make one connection attempt
    async fn dial(&self) -> Result<Link<Self::Stream>, ConnectionError>;

    /// Where this dialer connects, for logs
    fn describe(&self) -> String;
}

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not started
    Idle,
    /// Connection attempt in progress
    Dialing,
    /// Connected and exchanging messages
    Connected,
    /// Waiting before the next attempt
    BackoffWait,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Dialing => "dialing",
            SupervisorState::Connected => "connected",
            SupervisorState::BackoffWait => "backoff",
        };
        f.write_str(s)
    }
}

/// Why a connected period ended
#[derive(Debug)]
enum Disconnect {
    Eof,
    Read(hansel_protocol::ProtocolError),
    WriterGone,
    Cancelled,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Eof => f.write_str("server closed the channel"),
            Disconnect::Read(e) if e.is_frame_corrupt() => write!(f, "corrupt frame: {}", e),
            Disconnect::Read(e) => write!(f, "read failed: {}", e),
            Disconnect::WriterGone => f.write_str("write failed"),
            Disconnect::Cancelled => f.write_str("shutting down"),
        }
    }
}

/// Maintains the agent's single live connection
pub struct ReconnectSupervisor<D> {
    dialer: D,
    executor: CommandExecutor,
    status_interval: Duration,
    backoff: ExponentialBackoff,
    state: watch::Sender<SupervisorState>,
}

impl<D: Dialer> ReconnectSupervisor<D> {
    /// Create a supervisor using the timing and identity from `config`
    pub fn new(dialer: D, config: &AgentConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            dialer,
            executor: CommandExecutor::new(config.username.clone()),
            status_interval: config.status_interval,
            backoff: ExponentialBackoff::from_config(&config.backoff),
            state,
        }
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let target = self.dialer.describe();

        loop {
            self.set_state(SupervisorState::Dialing);
            tracing::debug!("Dialing {}", target);

            let dialed = tokio::select! {
                _ = cancel.cancelled() => break,
                dialed = self.dialer.dial() => dialed,
            };

            match dialed {
                Ok(link) => {
                    self.set_state(SupervisorState::Connected);
                    self.backoff.reset();
                    tracing::info!("Connected to {}", target);

                    let reason = self.run_connected(link, &cancel).await;
                    tracing::warn!("Disconnected from {}: {}", target, reason);
                }
                Err(ConnectionError::AuthRejected) => {
                    tracing::warn!(
                        "{} refused {}; awaiting approval of this identity",
                        target,
                        self.executor.client_name()
                    );
                }
                Err(e) => {
                    tracing::warn!("Connection to {} failed: {}", target, e);
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            self.set_state(SupervisorState::BackoffWait);
            let delay = self.backoff.next_delay();
            tracing::info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SupervisorState::Idle);
        tracing::info!("Supervisor stopped");
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }

    async fn run_connected(
        &mut self,
        link: Link<D::Stream>,
        cancel: &CancellationToken,
    ) -> Disconnect {
        let Link { stream, guard } = link;
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = FramedRead::new(reader, FrameCodec::new());
        let writer = FramedWrite::new(writer, FrameCodec::new());

        let connection = cancel.child_token();
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let writer_task = tokio::spawn(write_outbound(writer, rx, connection.clone()));
        let status_task = tokio::spawn(emit_status(
            outbound.clone(),
            self.executor.client_name().to_string(),
            self.status_interval,
            connection.clone(),
        ));

        let reason = self.read_inbound(&mut reader, &outbound, &connection).await;

        connection.cancel();
        if let Err(e) = status_task.await {
            tracing::error!("Status task failed: {}", e);
        }
        if let Err(e) = writer_task.await {
            tracing::error!("Writer task failed: {}", e);
        }
        drop(guard);

        if cancel.is_cancelled() {
            Disconnect::Cancelled
        } else {
            reason
        }
    }

    async fn read_inbound<R>(
        &mut self,
        reader: &mut FramedRead<R, FrameCodec>,
        outbound: &mpsc::Sender<Message>,
        connection: &CancellationToken,
    ) -> Disconnect
    where
        R: AsyncRead + Unpin,
    {
        let mut sequences = SequenceTracker::new();

        loop {
            let frame = tokio::select! {
                _ = connection.cancelled() => return Disconnect::WriterGone,
                frame = reader.next() => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Disconnect::Read(e),
                None => return Disconnect::Eof,
            };

            match message {
                Message::Task(task) => {
                    if let SequenceCheck::Replay { highest } = sequences.observe(task.sequence) {
                        tracing::debug!(
                            "Task {} re-delivered (highest seen {})",
                            task.sequence,
                            highest
                        );
                    }

                    let result = tokio::select! {
                        _ = connection.cancelled() => return Disconnect::WriterGone,
                        result = self.executor.handle(&task) => result,
                    };
                    if outbound.send(Message::Result(result)).await.is_err() {
                        return Disconnect::WriterGone;
                    }
                }
                other => {
                    tracing::warn!(
                        "Ignoring unexpected {:?} message from server",
                        other.message_type()
                    );
                }
            }
        }
    }
}

async fn write_outbound<W>(
    mut writer: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::Receiver<Message>,
    connection: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = connection.cancelled() => break,
            message = outbound.recv() => message,
        };
        let Some(message) = message else { break };

        tokio::select! {
            _ = connection.cancelled() => break,
            result = writer.send(message) => {
                if let Err(e) = result {
                    tracing::warn!("Write to server failed: {}", e);
                    break;
                }
            }
        }
    }

    // End the connected period if the writer stopped on its own
    connection.cancel();
    let _ = writer.close().await;
}

async fn emit_status(
    outbound: mpsc::Sender<Message>,
    client_name: String,
    period: Duration,
    connection: CancellationToken,
) {
    let mut interval = tokio::time::interval(period.max(MIN_STATUS_INTERVAL));

    loop {
        tokio::select! {
            _ = connection.cancelled() => break,
            _ = interval.tick() => {
                match outbound.try_send(Message::status(client_name.as_str(), KEEPALIVE_TEXT)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Outbound queue full, skipping keepalive");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}
