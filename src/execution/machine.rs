//! Status State Machine
//!
//! Applies status transitions to workflow executions and mirrors the result
//! onto the parent action execution. The child write always commits first,
//! so the parent can never show a terminal status its workflow has not
//! reached. Each committed write publishes exactly one state-change event.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info};
use serde_json::json;

use crate::error::{EngineError, EngineResult};

use super::events::{EventPublisher, RecordKind};
use super::record::{ActionExecution, WorkflowExecution};
use super::status::ExecutionStatus;
use super::store::{update_with_retry, RecordStore};

/// Drives execution status changes.
#[derive(Clone)]
pub struct StateMachine {
    workflows: Arc<dyn RecordStore<WorkflowExecution>>,
    actions: Arc<dyn RecordStore<ActionExecution>>,
    publisher: Arc<dyn EventPublisher>,
    max_attempts: u32,
}

impl StateMachine {
    pub fn new(
        workflows: Arc<dyn RecordStore<WorkflowExecution>>,
        actions: Arc<dyn RecordStore<ActionExecution>>,
        publisher: Arc<dyn EventPublisher>,
        max_attempts: u32,
    ) -> Self {
        Self {
            workflows,
            actions,
            publisher,
            max_attempts,
        }
    }

    /// Moves a workflow execution to `target` if the transition is legal.
    pub fn transition(&self, id: &str, target: ExecutionStatus) -> EngineResult<WorkflowExecution> {
        self.apply(id, target, |_| true, &format!("transition to '{}'", target))
    }

    /// Picks a requested execution up for scheduling.
    pub fn start(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(
            id,
            ExecutionStatus::Running,
            |s| s == ExecutionStatus::Requested,
            "start",
        )
    }

    pub fn pause(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(id, ExecutionStatus::Paused, |_| true, "pause")
    }

    pub fn resume(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(
            id,
            ExecutionStatus::Running,
            |s| s == ExecutionStatus::Paused,
            "resume",
        )
    }

    /// Marks an execution canceled. Advisory to tasks still in flight.
    pub fn cancel(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(id, ExecutionStatus::Canceled, |_| true, "cancel")
    }

    /// Entry point for the external watchdog.
    pub fn timeout(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(id, ExecutionStatus::TimedOut, |_| true, "time out")
    }

    pub fn succeed(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(id, ExecutionStatus::Succeeded, |_| true, "succeed")
    }

    pub fn fail(&self, id: &str) -> EngineResult<WorkflowExecution> {
        self.apply(id, ExecutionStatus::Failed, |_| true, "fail")
    }

    /// Transitions an action execution that has no workflow behind it.
    pub fn transition_action(&self, id: &str, target: ExecutionStatus) -> EngineResult<ActionExecution> {
        let updated = update_with_retry(self.actions.as_ref(), id, self.max_attempts, |ae: &mut ActionExecution| {
            if ae.is_workflow() {
                return Err(EngineError::BadRequest(format!(
                    "Execution '{}' is driven by its workflow execution",
                    ae.id
                )));
            }
            if !ae.status.can_transition_to(target) {
                return Err(EngineError::invalid_transition(
                    &ae.id,
                    ae.status,
                    format!("transition to '{}'", target),
                ));
            }
            ae.status = target;
            if target.is_terminal() {
                ae.end_timestamp = Some(Utc::now());
            }
            Ok(())
        })?;

        info!("Execution {} -> {}", updated.id, updated.status);
        self.publisher
            .publish_state_change(RecordKind::ActionExecution, &updated);
        Ok(updated)
    }

    fn apply<G>(&self, id: &str, target: ExecutionStatus, guard: G, verb: &str) -> EngineResult<WorkflowExecution>
    where
        G: Fn(ExecutionStatus) -> bool,
    {
        let updated = update_with_retry(self.workflows.as_ref(), id, self.max_attempts, |wf: &mut WorkflowExecution| {
            if !guard(wf.status) || !wf.status.can_transition_to(target) {
                return Err(EngineError::invalid_transition(&wf.id, wf.status, verb));
            }
            wf.status = target;
            if target.is_terminal() {
                wf.end_timestamp = Some(Utc::now());
            }
            Ok(())
        })?;

        info!("Workflow execution {} -> {} (rev {})", updated.id, updated.status, updated.revision);
        self.publisher
            .publish_state_change(RecordKind::WorkflowExecution, &updated);

        if let Err(e) = self.mirror_parent(&updated) {
            error!(
                "Workflow execution {} is {} but parent {} was not updated: {}",
                updated.id, updated.status, updated.action_execution, e
            );
            return Err(e);
        }

        Ok(updated)
    }

    /// Copies the child's coarse status onto the parent action execution.
    ///
    /// The child is re-read on every attempt, after the parent, so a
    /// transition that lands in between is either mirrored here or by its
    /// own call. A terminal parent is never written again.
    fn mirror_parent(&self, wf: &WorkflowExecution) -> EngineResult<()> {
        let mut mirrored = false;
        let parent = update_with_retry(
            self.actions.as_ref(),
            &wf.action_execution,
            self.max_attempts,
            |ae: &mut ActionExecution| {
                mirrored = false;
                if ae.status.is_terminal() {
                    return Ok(());
                }

                let child = self
                    .workflows
                    .get(&wf.id)?
                    .ok_or_else(|| EngineError::NotFound(format!("workflow execution '{}'", wf.id)))?;
                let view = child.status.parent_view();
                if ae.status == view {
                    return Ok(());
                }

                ae.status = view;
                if view.is_terminal() {
                    ae.end_timestamp = child.end_timestamp;
                    ae.result = json!({
                        "workflow_execution": child.id,
                        "tasks_completed": child.flow.sequence.len(),
                        "failed_tasks": child.flow.failed_tasks(),
                    });
                }
                mirrored = true;
                Ok(())
            },
        )?;

        if mirrored {
            self.publisher
                .publish_state_change(RecordKind::ActionExecution, &parent);
        }
        Ok(())
    }
}
