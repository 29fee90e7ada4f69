//! Task Flow
//!
//! Live record of which tasks have run on a workflow execution and in what
//! order they finished. `sequence` is append-only and holds each task id at
//! most once; looped nodes run again under a new task id (`node#2`, ...).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separator between a node id and its iteration in a task id.
pub const ITERATION_SEPARATOR: char = '#';

/// Status of a single task run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
}

/// Rejected task bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("task '{0}' has already started")]
    AlreadyStarted(String),

    #[error("task '{0}' has already completed")]
    AlreadyCompleted(String),

    #[error("task '{0}' must complete as succeeded or failed")]
    NotFinished(String),
}

/// Outcome reported by a task runner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub status: TaskStatus,

    #[serde(default)]
    pub output: Value,
}

impl TaskResult {
    pub fn succeeded(output: Value) -> Self {
        Self {
            status: TaskStatus::Succeeded,
            output,
        }
    }

    pub fn failed(output: Value) -> Self {
        Self {
            status: TaskStatus::Failed,
            output,
        }
    }
}

/// Observed state of one task run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,

    /// Graph node this run belongs to
    pub node: String,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
}

/// Returns the graph node a task id refers to.
///
/// ```
/// use orchestra::workflow::flow::node_of;
///
/// assert_eq!(node_of("task1"), "task1");
/// assert_eq!(node_of("task1#2"), "task1");
/// ```
pub fn node_of(task_id: &str) -> &str {
    task_id
        .split_once(ITERATION_SEPARATOR)
        .map(|(node, _)| node)
        .unwrap_or(task_id)
}

/// Tasks keyed by id plus their completion order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TaskFlow {
    pub tasks: BTreeMap<String, TaskRecord>,

    pub sequence: Vec<String>,
}

impl TaskFlow {
    /// Creates an empty flow.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a task began running.
    pub fn mark_started(&mut self, task_id: &str, at: DateTime<Utc>) -> Result<(), FlowError> {
        if self.is_completed(task_id) {
            return Err(FlowError::AlreadyCompleted(task_id.to_string()));
        }
        if self.tasks.contains_key(task_id) {
            return Err(FlowError::AlreadyStarted(task_id.to_string()));
        }

        self.tasks.insert(
            task_id.to_string(),
            TaskRecord {
                id: task_id.to_string(),
                node: node_of(task_id).to_string(),
                status: TaskStatus::Running,
                started_at: Some(at),
                completed_at: None,
                result: Value::Null,
            },
        );
        Ok(())
    }

    /// Records that a task finished and appends it to `sequence`.
    ///
    /// A completion without a prior start is accepted; the tracker only
    /// reports what it observed.
    pub fn mark_completed(
        &mut self,
        task_id: &str,
        result: TaskResult,
        at: DateTime<Utc>,
    ) -> Result<(), FlowError> {
        if result.status == TaskStatus::Running {
            return Err(FlowError::NotFinished(task_id.to_string()));
        }
        if self.is_completed(task_id) {
            return Err(FlowError::AlreadyCompleted(task_id.to_string()));
        }

        let record = self
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskRecord {
                id: task_id.to_string(),
                node: node_of(task_id).to_string(),
                status: TaskStatus::Running,
                started_at: None,
                completed_at: None,
                result: Value::Null,
            });
        record.status = result.status;
        record.completed_at = Some(at);
        record.result = result.output;

        self.sequence.push(task_id.to_string());
        Ok(())
    }

    /// Returns true if the task has finished.
    pub fn is_completed(&self, task_id: &str) -> bool {
        self.sequence.iter().any(|t| t == task_id)
    }

    /// Returns ids of tasks started but not finished, in id order.
    pub fn running_tasks(&self) -> Vec<&str> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id.as_str())
            .collect()
    }

    /// Returns ids of failed tasks in completion order.
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.sequence
            .iter()
            .filter(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|t| t.status == TaskStatus::Failed)
            })
            .map(String::as_str)
            .collect()
    }

    /// Checks that every sequenced id has a task record.
    pub fn is_consistent(&self) -> bool {
        self.sequence.iter().all(|id| self.tasks.contains_key(id))
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.sequence.is_empty()
    }
}
