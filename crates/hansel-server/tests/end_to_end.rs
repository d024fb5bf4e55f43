//! End-to-end server tests
//!
//! Drives real sessions over in-memory duplex streams in place of SSH
//! channels: admission, registration, task push, results, control queries
//! and teardown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

use hansel_core::config::ServerConfig;
use hansel_core::control::ControlRecord;
use hansel_core::tasks::TaskDefinition;
use hansel_core::{ClientPattern, Identity, SessionState};
use hansel_protocol::{ControlRequest, FrameCodec, Message, ResultMessage};
use hansel_server::auth::{AuthDecision, IdentityStore};
use hansel_server::control::answer_query;
use hansel_server::session::run_session;
use hansel_server::{ServerState, TaskCatalog};

const WAIT: Duration = Duration::from_secs(5);

struct Agent {
    reader: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    writer: FramedWrite<WriteHalf<DuplexStream>, FrameCodec>,
    session: JoinHandle<()>,
}

fn server_state(dir: &Path, authorized: &str, tasks: Vec<TaskDefinition>) -> Arc<ServerState> {
    std::fs::write(dir.join("authorized_users"), authorized).unwrap();
    let config = ServerConfig {
        authorized_users_path: dir.join("authorized_users"),
        pending_users_path: dir.join("pending_users"),
        tasks_dir: dir.join("tasks"),
        outbound_queue_capacity: 16,
        ..ServerConfig::default()
    };
    let store =
        IdentityStore::open(&config.authorized_users_path, &config.pending_users_path).unwrap();
    Arc::new(ServerState::new(config, store, TaskCatalog::new(tasks)))
}

fn echo_task(sequence: u64, target: &str) -> TaskDefinition {
    TaskDefinition {
        sequence,
        kind: "command".to_string(),
        actions: vec!["echo hi".to_string()],
        targets: [target.to_string()].into_iter().collect(),
    }
}

/// Authenticate and, if admitted, start a session over an in-memory stream
async fn connect(state: &Arc<ServerState>, user: &str, fp: &str) -> Option<Agent> {
    let identity = Identity::new(user, fp);
    if state.authenticator.authenticate(identity.clone()).await != AuthDecision::Admit {
        return None;
    }

    let (agent_io, server_io) = tokio::io::duplex(64 * 1024);
    let (session, outbound) = state.new_session(identity, Some("127.0.0.1:50000".to_string()));
    let handle = tokio::spawn(run_session(Arc::clone(state), session, outbound, server_io));

    let (read, write) = tokio::io::split(agent_io);
    Some(Agent {
        reader: FramedRead::new(read, FrameCodec::new()),
        writer: FramedWrite::new(write, FrameCodec::new()),
        session: handle,
    })
}

async fn next_message(agent: &mut Agent) -> Option<Message> {
    timeout(WAIT, agent.reader.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|frame| frame.unwrap())
}

async fn control_query(state: &ServerState, pattern: &str) -> Vec<Message> {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(client);
    let mut writer = FramedWrite::new(write, FrameCodec::new());
    writer
        .send(Message::ControlRequest(ControlRequest {
            pattern: pattern.to_string(),
        }))
        .await
        .unwrap();
    answer_query(server, &state.registry).await.unwrap();

    FramedRead::new(read, FrameCodec::new())
        .map(|frame| frame.unwrap())
        .collect()
        .await
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn pattern(p: &str) -> ClientPattern {
    ClientPattern::new(p).unwrap()
}

#[tokio::test]
async fn test_alice_task_result_and_control_query() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(dir.path(), "alice=fp123\n", vec![echo_task(1, "ali.*")]);

    let mut alice = connect(&state, "alice", "fp123").await.expect("alice admitted");

    // Registration pushes the matching task
    let task = match next_message(&mut alice).await {
        Some(Message::Task(task)) => task,
        other => panic!("expected a task, got {:?}", other),
    };
    assert_eq!(task.sequence, 1);
    assert_eq!(task.actions, vec!["echo hi"]);

    alice
        .writer
        .send(Message::Result(ResultMessage {
            sequence: 1,
            client_name: "alice".to_string(),
            outputs: vec!["hi\n".to_string()],
        }))
        .await
        .unwrap();
    alice
        .writer
        .send(Message::status("alice", "keepalive"))
        .await
        .unwrap();

    wait_until(|| {
        state
            .registry
            .find(&pattern("alice"))
            .first()
            .map(|s| s.last_result.is_some() && s.last_status.is_some())
            .unwrap_or(false)
    })
    .await;

    let replies = control_query(&state, "ali.*").await;
    assert_eq!(replies.len(), 1);
    let record = match &replies[0] {
        Message::Result(result) => ControlRecord::from(result.clone()),
        other => panic!("expected a record, got {:?}", other),
    };
    assert_eq!(record.client_name, "alice");
    assert_eq!(record.last_sequence, 1);
    assert_eq!(record.status, "keepalive");
    assert_eq!(record.outputs, vec!["hi\n"]);

    // Agent hangs up: the entry goes away once teardown finishes
    drop(alice.writer);
    drop(alice.reader);
    timeout(WAIT, alice.session).await.unwrap().unwrap();
    assert!(state.registry.is_empty());
    assert!(control_query(&state, "ali.*").await.is_empty());
}

#[tokio::test]
async fn test_bob_is_pending_once_and_never_registered() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(dir.path(), "", Vec::new());

    assert!(connect(&state, "bob", "fpXYZ").await.is_none());
    assert!(connect(&state, "bob", "fpXYZ").await.is_none());

    let pending = std::fs::read_to_string(dir.path().join("pending_users")).unwrap();
    assert_eq!(pending.lines().filter(|l| *l == "bob=fpXYZ").count(), 1);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_reconnect_replaces_stale_session() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(dir.path(), "alice=fp123\n", vec![echo_task(7, "alice")]);

    let mut first = connect(&state, "alice", "fp123").await.unwrap();
    assert!(matches!(next_message(&mut first).await, Some(Message::Task(t)) if t.sequence == 7));
    let first_id = state.registry.find(&pattern("alice"))[0].session_id;

    let mut second = connect(&state, "alice", "fp123").await.unwrap();
    // Tasks are pushed again to the new session
    assert!(matches!(next_message(&mut second).await, Some(Message::Task(t)) if t.sequence == 7));

    // The stale session is closed by the replacement and its channel ends
    assert_eq!(next_message(&mut first).await, None);
    timeout(WAIT, first.session).await.unwrap().unwrap();

    let found = state.registry.find(&pattern("alice"));
    assert_eq!(found.len(), 1);
    assert_ne!(found[0].session_id, first_id);
    assert_eq!(state.registry.len(), 1);
}

#[tokio::test]
async fn test_corrupt_frame_closes_session() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(dir.path(), "carol=fp1\n", Vec::new());

    let mut carol = connect(&state, "carol", "fp1").await.unwrap();
    wait_until(|| state.registry.len() == 1).await;

    // Unknown type tag with a plausible length
    carol
        .writer
        .get_mut()
        .write_all(&[0x7F, 0, 0, 0, 1, 0])
        .await
        .unwrap();

    timeout(WAIT, carol.session).await.unwrap().unwrap();
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(dir.path(), "dave=fp2\n", Vec::new());

    let dave = connect(&state, "dave", "fp2").await.unwrap();
    wait_until(|| state.registry.len() == 1).await;
    let session = state.registry.sessions().pop().unwrap();

    state.shutdown.cancel();
    timeout(WAIT, dave.session).await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(state.registry.is_empty());
}
