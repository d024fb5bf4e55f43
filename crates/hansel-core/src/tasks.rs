//! Task definition loading
//!
//! Tasks are YAML documents, one per file, in a configured directory:
//!
//! ```yaml
//! sequence: 3
//! type: command
//! actions:
//!   - echo hi
//!   - uptime
//! targets:
//!   - web-.*
//!   - db-1
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use hansel_protocol::TaskMessage;

use crate::error::StoreError;

/// File extension of task definitions
pub const TASK_EXTENSION: &str = "yml";

/// A task as written on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Sequence number, echoed back in the agent's `Result`
    pub sequence: u64,
    /// Task kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Shell actions, run in order
    pub actions: Vec<String>,
    /// Client name patterns
    pub targets: BTreeSet<String>,
}

impl TaskDefinition {
    /// Build the wire message for this task
    pub fn to_message(&self) -> TaskMessage {
        TaskMessage {
            sequence: self.sequence,
            kind: self.kind.clone(),
            actions: self.actions.clone(),
            targets: self.targets.clone(),
        }
    }
}

/// Load every task definition in `dir`, sorted by sequence
///
/// Only regular `*.yml` files no larger than `max_size` bytes are read.
/// Unreadable or malformed files are logged and skipped; only a failure to
/// list the directory itself is an error.
pub fn load_task_dir(dir: &Path, max_size: u64) -> Result<Vec<TaskDefinition>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut tasks = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TASK_EXTENSION) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        if metadata.len() > max_size {
            tracing::warn!(
                "Skipping {:?}: {} bytes exceeds the {} byte limit",
                path,
                metadata.len(),
                max_size
            );
            continue;
        }

        match load_task_file(&path) {
            Ok(task) => {
                tracing::debug!("Loaded task {} from {:?}", task.sequence, path);
                tasks.push(task);
            }
            Err(e) => tracing::warn!("Skipping malformed task file {:?}: {}", path, e),
        }
    }

    tasks.sort_by_key(|t| t.sequence);
    tracing::info!("Loaded {} task definitions from {:?}", tasks.len(), dir);
    Ok(tasks)
}

fn load_task_file(path: &Path) -> Result<TaskDefinition, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_yaml::from_str(&content).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_TASK: &str =
        "sequence: 2\ntype: command\nactions:\n  - echo hi\ntargets:\n  - ali.*\n";

    #[test]
    fn test_parse_definition() {
        let task: TaskDefinition = serde_yaml::from_str(ECHO_TASK).unwrap();
        assert_eq!(task.sequence, 2);
        assert_eq!(task.kind, "command");
        assert_eq!(task.actions, vec!["echo hi"]);
        assert!(task.targets.contains("ali.*"));

        let msg = task.to_message();
        assert_eq!(msg.sequence, 2);
        assert_eq!(msg.actions, task.actions);
    }

    #[test]
    fn test_load_dir_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yml"), ECHO_TASK).unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "sequence: 1\ntype: command\nactions: [uptime]\ntargets: [db]\n",
        )
        .unwrap();
        // Wrong extension, malformed, oversized and a directory are all ignored
        std::fs::write(dir.path().join("c.yaml"), ECHO_TASK).unwrap();
        std::fs::write(dir.path().join("broken.yml"), "sequence: [").unwrap();
        std::fs::write(
            dir.path().join("huge.yml"),
            format!("{}# {}\n", ECHO_TASK, "x".repeat(512)),
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested.yml")).unwrap();

        let tasks = load_task_dir(dir.path(), 256).unwrap();
        let sequences: Vec<u64> = tasks.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_task_dir(&dir.path().join("absent"), 1024).is_err());
    }
}
