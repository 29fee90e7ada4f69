//! Flow Tracker
//!
//! Records task starts and completions on a workflow execution's flow.
//! Every update is a read, mutate, compare-and-swap cycle on the record's
//! revision, retried on conflict. The tracker only reports what happened;
//! it never decides which task runs next.

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::error::{EngineError, EngineResult};
use crate::workflow::flow::node_of;
use crate::workflow::TaskResult;

use super::record::WorkflowExecution;
use super::status::ExecutionStatus;
use super::store::{update_with_retry, RecordStore};

/// Writes task progress onto workflow executions.
#[derive(Clone)]
pub struct FlowTracker {
    store: Arc<dyn RecordStore<WorkflowExecution>>,
    max_attempts: u32,
}

impl FlowTracker {
    pub fn new(store: Arc<dyn RecordStore<WorkflowExecution>>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Reads the current state of a workflow execution.
    pub fn current(&self, execution_id: &str) -> EngineResult<WorkflowExecution> {
        self.store.get(execution_id)?.ok_or_else(|| {
            EngineError::NotFound(format!("workflow execution '{}'", execution_id))
        })
    }

    /// Records that `task_id` began running. The execution must be running.
    pub fn record_task_start(&self, execution_id: &str, task_id: &str) -> EngineResult<WorkflowExecution> {
        let at = Utc::now();
        let updated = update_with_retry(self.store.as_ref(), execution_id, self.max_attempts, |wf: &mut WorkflowExecution| {
            check_task(wf, task_id, &[ExecutionStatus::Running], "start task")?;
            wf.flow.mark_started(task_id, at)?;
            Ok(())
        })?;

        debug!("Task '{}' started on {} (rev {})", task_id, execution_id, updated.revision);
        Ok(updated)
    }

    /// Records that `task_id` finished and appends it to the sequence.
    ///
    /// Accepted while running or paused; a paused execution still collects
    /// results from tasks that were in flight when it paused.
    pub fn record_task_complete(
        &self,
        execution_id: &str,
        task_id: &str,
        result: TaskResult,
    ) -> EngineResult<WorkflowExecution> {
        let at = Utc::now();
        let updated = update_with_retry(self.store.as_ref(), execution_id, self.max_attempts, |wf: &mut WorkflowExecution| {
            check_task(
                wf,
                task_id,
                &[ExecutionStatus::Running, ExecutionStatus::Paused],
                "complete task",
            )?;
            wf.flow.mark_completed(task_id, result.clone(), at)?;
            Ok(())
        })?;

        debug!(
            "Task '{}' completed on {} (rev {}, {} in sequence)",
            task_id,
            execution_id,
            updated.revision,
            updated.flow.sequence.len()
        );
        Ok(updated)
    }
}

fn check_task(
    wf: &WorkflowExecution,
    task_id: &str,
    accepted: &[ExecutionStatus],
    action: &str,
) -> EngineResult<()> {
    if !accepted.contains(&wf.status) {
        return Err(EngineError::invalid_transition(
            &wf.id,
            wf.status,
            format!("{} '{}'", action, task_id),
        ));
    }
    if !wf.graph.contains(node_of(task_id)) {
        return Err(EngineError::NotFound(format!(
            "task '{}' in workflow execution '{}'",
            task_id, wf.id
        )));
    }
    Ok(())
}
