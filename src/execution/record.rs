//! Execution Records
//!
//! Persisted shapes of the parent action execution and its workflow
//! execution. Serialized field names are the ones API clients see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::workflow::{ExecutionGraph, TaskFlow};

use super::status::ExecutionStatus;

/// Caller identity captured when the execution was requested.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RbacContext {
    pub user: String,

    /// Sorted names of every role assigned to `user` at request time
    pub roles: Vec<String>,
}

/// Context shared by an action execution and its workflow execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ExecutionContext {
    pub pack: String,

    /// User the execution belongs to
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac: Option<RbacContext>,

    /// Id of the workflow execution (lookup only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution: Option<String>,
}

/// Parent execution record for a requested action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionExecution {
    pub id: String,

    #[serde(rename = "rev")]
    pub revision: u64,

    /// `pack.name` of the requested action
    pub action: String,

    pub status: ExecutionStatus,

    pub context: ExecutionContext,

    #[serde(default)]
    pub parameters: Map<String, Value>,

    #[serde(default)]
    pub result: Value,

    pub start_timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,
}

impl ActionExecution {
    /// Returns the RBAC resource uid for this execution.
    pub fn uid(&self) -> String {
        format!("execution:{}", self.id)
    }

    pub fn is_workflow(&self) -> bool {
        self.context.workflow_execution.is_some()
    }
}

/// Workflow execution: compiled graph plus live task flow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowExecution {
    pub id: String,

    #[serde(rename = "rev")]
    pub revision: u64,

    /// Id of the parent action execution
    pub action_execution: String,

    pub status: ExecutionStatus,

    pub graph: ExecutionGraph,

    pub flow: TaskFlow,

    pub input: Map<String, Value>,

    pub context: ExecutionContext,

    pub start_timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,
}
