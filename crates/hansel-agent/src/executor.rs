//! Task execution on the agent

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;

use hansel_core::control::ERROR_PREFIX;
use hansel_core::error::ExecError;
use hansel_protocol::{ResultMessage, TaskMessage};

/// The only task kind agents run
pub const COMMAND_KIND: &str = "command";

/// Run one action and return its stdout followed by its stderr
///
/// The action is split on whitespace into program and arguments; no shell
/// is involved. A non-zero exit is logged but still counts as output.
pub async fn run_action(index: usize, action: &str) -> Result<String, ExecError> {
    let mut words = action.split_whitespace();
    let program = words.next().ok_or(ExecError::EmptyAction { index })?;

    tracing::debug!("Running action {}: {}", index, action);
    let output = Command::new(program)
        .args(words)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        tracing::warn!("Action {} '{}' exited with {}", index, action, output.status);
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Run `actions` in order, appending one output per completed action
///
/// Stops at the first action that cannot be started; `outputs` then holds
/// the outputs of the actions before it.
pub async fn execute(actions: &[String], outputs: &mut Vec<String>) -> Result<(), ExecError> {
    for (index, action) in actions.iter().enumerate() {
        outputs.push(run_action(index, action).await?);
    }
    Ok(())
}

/// Runs tasks for one agent and remembers their results
///
/// Results are kept by sequence for the life of the process, so a task
/// delivered again after a reconnect is answered from the cache instead of
/// being run twice.
#[derive(Debug)]
pub struct CommandExecutor {
    client_name: String,
    completed: HashMap<u64, ResultMessage>,
}

impl CommandExecutor {
    /// Create an executor reporting as `client_name`
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            completed: HashMap::new(),
        }
    }

    /// Name placed in every result
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Whether a result for `sequence` is cached
    pub fn has_completed(&self, sequence: u64) -> bool {
        self.completed.contains_key(&sequence)
    }

    /// Run `task` (or recall its earlier result) and build the result message
    ///
    /// A fatal execution error still yields a result: the partial outputs
    /// followed by an `error: ...` line.
    pub async fn handle(&mut self, task: &TaskMessage) -> ResultMessage {
        if let Some(cached) = self.completed.get(&task.sequence) {
            tracing::info!("Task {} already ran; resending its result", task.sequence);
            return cached.clone();
        }

        let mut outputs = Vec::with_capacity(task.actions.len());
        if task.kind != COMMAND_KIND {
            tracing::warn!("Task {} has unsupported type '{}'", task.sequence, task.kind);
            outputs.push(format!("{}unsupported task type '{}'", ERROR_PREFIX, task.kind));
        } else {
            tracing::info!(
                "Running task {} ({} actions)",
                task.sequence,
                task.actions.len()
            );
            if let Err(e) = execute(&task.actions, &mut outputs).await {
                tracing::error!("Task {} aborted: {}", task.sequence, e);
                outputs.push(format!("{}{}", ERROR_PREFIX, e));
            }
        }

        let result = ResultMessage {
            sequence: task.sequence,
            client_name: self.client_name.clone(),
            outputs,
        };
        self.completed.insert(task.sequence, result.clone());
        result
    }
}
