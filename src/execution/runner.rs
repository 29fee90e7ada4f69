//! Local Runner
//!
//! Drives a workflow execution to completion in-process. Ready nodes are
//! dispatched to worker threads (bounded by `max_parallel`), each worker
//! reports its start and completion through the [`FlowTracker`], and the
//! main loop collects outcomes over a channel before scheduling more work.
//!
//! Tasks are simulated: a node succeeds unless it was marked as failing.
//! A node becomes ready once all of its forward predecessors succeeded;
//! loop edges are recorded in the graph but not followed here.

use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde_json::json;

use crate::error::{EngineError, EngineResult};
use crate::workflow::{TaskResult, TaskStatus};

use super::machine::StateMachine;
use super::record::WorkflowExecution;
use super::service::ExecutionService;
use super::status::ExecutionStatus;
use super::tracker::FlowTracker;

type Outcome = (String, EngineResult<TaskStatus>);

/// In-process scheduler for workflow executions.
///
/// # Example
///
/// ```rust,no_run
/// use orchestra::execution::{ExecutionService, LocalRunner};
///
/// fn run(service: &ExecutionService) -> orchestra::EngineResult<()> {
///     let (_, workflow) = service.request("stanley", "wolfpack.sequential", Default::default())?;
///     if let Some(workflow) = workflow {
///         let finished = LocalRunner::for_service(service).with_max_parallel(4).run(&workflow)?;
///         println!("{}", finished.status);
///     }
///     Ok(())
/// }
/// ```
pub struct LocalRunner {
    machine: StateMachine,
    tracker: FlowTracker,
    max_parallel: usize,
    failing: HashSet<String>,
    task_delay: Duration,
}

impl LocalRunner {
    pub fn new(machine: StateMachine, tracker: FlowTracker) -> Self {
        Self {
            machine,
            tracker,
            max_parallel: num_cpus::get(),
            failing: HashSet::new(),
            task_delay: Duration::ZERO,
        }
    }

    pub fn for_service(service: &ExecutionService) -> Self {
        Self::new(service.state_machine().clone(), service.tracker().clone())
    }

    /// Sets the maximum number of tasks in flight.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    /// Makes every run of `node` report failure.
    pub fn with_failing_task(mut self, node: impl Into<String>) -> Self {
        self.failing.insert(node.into());
        self
    }

    /// Sets how long each simulated task takes.
    pub fn with_task_delay(mut self, delay: Duration) -> Self {
        self.task_delay = delay;
        self
    }

    /// Runs the workflow execution until it finishes or leaves `running`.
    ///
    /// Returns the final record. If someone else pauses or cancels the
    /// execution mid-run, in-flight tasks drain and the current record is
    /// returned as is.
    pub fn run(&self, workflow: &WorkflowExecution) -> EngineResult<WorkflowExecution> {
        let start_time = Instant::now();
        let id = workflow.id.clone();
        let graph = &workflow.graph;

        if workflow.status == ExecutionStatus::Requested {
            self.machine.start(&id)?;
        }

        info!(
            "Running workflow execution {} ({} tasks, max parallel: {})",
            id,
            graph.len(),
            self.max_parallel
        );

        let (tx, rx): (Sender<Outcome>, Receiver<Outcome>) = channel();

        let mut scheduled: HashSet<String> = HashSet::new();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut failed: Option<String> = None;
        let mut interrupted = false;
        let mut first_error: Option<EngineError> = None;
        let mut running_count = 0;

        loop {
            let accepting = failed.is_none() && !interrupted && first_error.is_none();

            while accepting && running_count < self.max_parallel {
                let ready: Vec<String> = graph
                    .nodes
                    .iter()
                    .filter(|n| !scheduled.contains(&n.id))
                    .filter(|n| {
                        graph
                            .predecessors(&n.id)
                            .iter()
                            .all(|p| succeeded.contains(*p))
                    })
                    .map(|n| n.id.clone())
                    .collect();

                if ready.is_empty() {
                    break;
                }

                for node in ready {
                    if running_count >= self.max_parallel {
                        break;
                    }

                    info!("Starting task: {}", node);
                    scheduled.insert(node.clone());
                    self.spawn_task(&id, node, tx.clone());
                    running_count += 1;
                }
            }

            if running_count == 0 {
                break;
            }

            let (node, outcome) = match rx.recv() {
                Ok(message) => message,
                Err(e) => {
                    error!("Failed to receive task completion: {}", e);
                    break;
                }
            };
            running_count -= 1;

            match outcome {
                Ok(TaskStatus::Succeeded) => {
                    info!("Task '{}' completed successfully", node);
                    succeeded.insert(node);
                }
                Ok(_) => {
                    error!("Task '{}' failed", node);
                    if failed.is_none() {
                        failed = Some(node);
                    }
                }
                Err(EngineError::InvalidStateTransition { status, .. }) => {
                    warn!("Task '{}' not recorded: execution {} is {}", node, id, status);
                    interrupted = true;
                }
                Err(e) => {
                    error!("Task '{}' could not be recorded: {}", node, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        // A pause or cancel may have landed while the last tasks drained
        let current = self.tracker.current(&id)?;
        if interrupted || current.status != ExecutionStatus::Running {
            info!("Workflow execution {} is {} after draining; leaving it as is", id, current.status);
            return Ok(current);
        }

        let finished = match failed {
            Some(node) => {
                error!("Workflow execution {} failed at task '{}'", id, node);
                self.machine.fail(&id)
            }
            None => self.machine.succeed(&id),
        };
        let finished = match finished {
            Ok(finished) => finished,
            Err(EngineError::InvalidStateTransition { status, .. }) => {
                warn!("Workflow execution {} became {} before it could finish", id, status);
                return self.tracker.current(&id);
            }
            Err(e) => return Err(e),
        };

        info!(
            "Workflow execution {} finished as {} in {:.2?}",
            id,
            finished.status,
            start_time.elapsed()
        );
        Ok(finished)
    }

    fn spawn_task(&self, execution_id: &str, node: String, tx: Sender<Outcome>) {
        let tracker = self.tracker.clone();
        let execution_id = execution_id.to_string();
        let fails = self.failing.contains(&node);
        let delay = self.task_delay;

        thread::spawn(move || {
            let outcome = tracker
                .record_task_start(&execution_id, &node)
                .and_then(|_| {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    let result = if fails {
                        TaskResult::failed(json!({"error": format!("task '{}' failed", node)}))
                    } else {
                        TaskResult::succeeded(json!({"task": node}))
                    };
                    let status = result.status;
                    tracker
                        .record_task_complete(&execution_id, &node, result)
                        .map(|_| status)
                });

            if let Err(e) = tx.send((node, outcome)) {
                error!("Failed to send completion signal: {}", e);
            }
        });
    }
}
