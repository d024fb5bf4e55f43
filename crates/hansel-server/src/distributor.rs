//! Task fan-out to matching sessions

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use hansel_core::error::{SessionError, StoreError};
use hansel_core::tasks::{load_task_dir, TaskDefinition};
use hansel_core::ClientPattern;
use hansel_protocol::{Message, TaskMessage};

use crate::registry::ClientRegistry;
use crate::session::SessionHandle;

/// Why a task did not reach a target
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryFailure {
    /// A target pattern did not compile
    InvalidPattern { pattern: String, error: String },
    /// The session refused the message
    Rejected {
        client_name: String,
        error: SessionError,
    },
}

/// Per-target outcome of one distribution
///
/// Distribution is best effort: deliveries already made stay made even when
/// other targets fail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionReport {
    /// Clients whose outbound queue accepted the task
    pub delivered: Vec<String>,
    /// Targets that were not reached
    pub failures: Vec<DeliveryFailure>,
}

impl DistributionReport {
    /// Whether every resolved target accepted the task
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The set of loaded task definitions
#[derive(Debug, Default)]
pub struct TaskCatalog {
    tasks: RwLock<Vec<TaskMessage>>,
}

impl TaskCatalog {
    /// Build a catalog from definitions
    pub fn new(definitions: Vec<TaskDefinition>) -> Self {
        Self {
            tasks: RwLock::new(definitions.iter().map(TaskDefinition::to_message).collect()),
        }
    }

    /// Load every task in `dir`
    pub fn load(dir: &Path, max_file_size: u64) -> Result<Self, StoreError> {
        Ok(Self::new(load_task_dir(dir, max_file_size)?))
    }

    /// Replace the catalog with the current contents of `dir`
    pub fn reload(&self, dir: &Path, max_file_size: u64) -> Result<usize, StoreError> {
        let tasks: Vec<TaskMessage> = load_task_dir(dir, max_file_size)?
            .iter()
            .map(TaskDefinition::to_message)
            .collect();
        let count = tasks.len();
        *self.tasks.write().unwrap_or_else(PoisonError::into_inner) = tasks;
        Ok(count)
    }

    /// Copy of all tasks, sorted by sequence
    pub fn tasks(&self) -> Vec<TaskMessage> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of loaded tasks
    pub fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no task is loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pushes tasks into the outbound queues of matching sessions
#[derive(Debug, Clone)]
pub struct TaskDistributor {
    registry: Arc<ClientRegistry>,
    catalog: Arc<TaskCatalog>,
}

impl TaskDistributor {
    /// Create a distributor over `registry` and `catalog`
    pub fn new(registry: Arc<ClientRegistry>, catalog: Arc<TaskCatalog>) -> Self {
        Self { registry, catalog }
    }

    /// The loaded tasks
    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    /// Send `task` to every live client matched by one of its targets
    ///
    /// A client matched by several targets receives the task once.
    pub fn distribute(&self, task: &TaskMessage) -> DistributionReport {
        let mut report = DistributionReport::default();
        let mut matched: BTreeMap<String, Arc<SessionHandle>> = BTreeMap::new();

        for target in &task.targets {
            match ClientPattern::new(target) {
                Ok(pattern) => {
                    for session in self.registry.find_sessions(&pattern) {
                        matched.insert(session.client_name().to_string(), session);
                    }
                }
                Err(e) => {
                    tracing::warn!("Task {}: {}", task.sequence, e);
                    report.failures.push(DeliveryFailure::InvalidPattern {
                        pattern: target.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for (name, session) in matched {
            deliver(&session, task, name, &mut report);
        }

        tracing::info!(
            "Task {} delivered to {} clients ({} failures)",
            task.sequence,
            report.delivered.len(),
            report.failures.len()
        );
        report
    }

    /// Send every catalog task to the whole fleet
    pub fn distribute_all(&self) -> Vec<(u64, DistributionReport)> {
        self.catalog
            .tasks()
            .iter()
            .map(|task| (task.sequence, self.distribute(task)))
            .collect()
    }

    /// Send every catalog task that targets `session`'s client name
    ///
    /// Called when a session registers, so agents that connect after the
    /// tasks were loaded still receive them.
    pub fn distribute_to(&self, session: &SessionHandle) -> DistributionReport {
        let name = session.client_name().to_string();
        let mut report = DistributionReport::default();

        for task in self.catalog.tasks() {
            if targets_client(&task, &name, &mut report) {
                deliver(session, &task, name.clone(), &mut report);
            }
        }

        if !report.delivered.is_empty() || !report.is_complete() {
            tracing::debug!(
                "Pushed {} tasks to {} ({} failures)",
                report.delivered.len(),
                name,
                report.failures.len()
            );
        }
        report
    }
}

fn targets_client(task: &TaskMessage, name: &str, report: &mut DistributionReport) -> bool {
    let mut matched = false;
    for target in &task.targets {
        match ClientPattern::new(target) {
            Ok(pattern) => matched |= pattern.is_match(name),
            Err(e) => report.failures.push(DeliveryFailure::InvalidPattern {
                pattern: target.clone(),
                error: e.to_string(),
            }),
        }
    }
    matched
}

fn deliver(
    session: &SessionHandle,
    task: &TaskMessage,
    name: String,
    report: &mut DistributionReport,
) {
    match session.send(Message::Task(task.clone())) {
        Ok(()) => report.delivered.push(name),
        Err(error) => {
            tracing::warn!("Task {} not delivered to {}: {}", task.sequence, name, error);
            report.failures.push(DeliveryFailure::Rejected {
                client_name: name,
                error,
            });
        }
    }
}
