//! Engine Error Types
//!
//! A single error enum covers every failure the execution core can surface.
//! Compilation and input validation failures abort before anything is
//! persisted; write conflicts are retried internally and only escape as
//! [`EngineError::TransientWriteFailure`].

use thiserror::Error;

use crate::execution::status::ExecutionStatus;
use crate::rbac::types::PermissionType;
use crate::workflow::flow::FlowError;
use crate::workflow::schema::InputValidationReport;
use crate::workflow::validator::DefinitionError;

/// Errors produced by the execution core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Workflow definition is malformed or cyclic
    #[error("Invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    /// Action or workflow definition could not be resolved
    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    /// Request input does not match the declared schema
    #[error("Input validation failed: {0}")]
    InputValidation(InputValidationReport),

    /// Action exists but is disabled
    #[error("Action '{0}' is disabled")]
    ActionDisabled(String),

    /// Compare-and-swap lost against a concurrent writer
    #[error("Record '{id}' was modified concurrently (expected revision {expected}, found {actual})")]
    ConcurrentModification {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Compare-and-swap kept losing after the bounded number of attempts
    #[error("Could not persist record '{id}' after {attempts} attempts")]
    TransientWriteFailure { id: String, attempts: u32 },

    /// Status transition or flow write rejected by the state machine
    #[error("Execution '{id}' in status '{status}' cannot {action}")]
    InvalidStateTransition {
        id: String,
        status: ExecutionStatus,
        action: String,
    },

    /// Task-level bookkeeping conflict (duplicate start or completion)
    #[error("Task flow rejected update: {0}")]
    Flow(#[from] FlowError),

    /// Access-control denial
    #[error("User '{user}' does not have permission '{permission}' on '{resource}'")]
    Forbidden {
        user: String,
        permission: PermissionType,
        resource: String,
    },

    /// Record does not exist or is not visible to the caller
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed request argument
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store backend failure
    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Builds an [`EngineError::InvalidStateTransition`] for a record.
    pub fn invalid_transition(
        id: impl Into<String>,
        status: ExecutionStatus,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            id: id.into(),
            status,
            action: action.into(),
        }
    }

    /// Builds an [`EngineError::Forbidden`] denial.
    pub fn forbidden(
        user: impl Into<String>,
        permission: PermissionType,
        resource: impl Into<String>,
    ) -> Self {
        Self::Forbidden {
            user: user.into(),
            permission,
            resource: resource.into(),
        }
    }

    /// Returns true for errors a writer may resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = EngineError::NotFound("execution 'abc'".to_string());
        assert_eq!(err.to_string(), "Resource not found: execution 'abc'");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = EngineError::invalid_transition("wf1", ExecutionStatus::Succeeded, "transition to 'running'");
        assert_eq!(
            err.to_string(),
            "Execution 'wf1' in status 'succeeded' cannot transition to 'running'"
        );
    }

    #[test]
    fn test_forbidden_display() {
        let err = EngineError::forbidden("observer", PermissionType::ExecutionListAll, "execution");
        assert!(err.to_string().contains("execution_list_all"));
        assert!(err.to_string().contains("observer"));
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = EngineError::ConcurrentModification {
            id: "wf1".to_string(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_retryable());

        let exhausted = EngineError::TransientWriteFailure {
            id: "wf1".to_string(),
            attempts: 5,
        };
        assert!(!exhausted.is_retryable());
    }
}
