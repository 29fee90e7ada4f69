//! Orchestra - Workflow Execution Core
//!
//! Accepts requests to run workflow actions, compiles their definitions
//! into execution graphs, tracks task progress under optimistic concurrency,
//! and gates every read and listing through role-based access control.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Definitions, loaders, graph compiler and input validation
//! - [`execution`]: Execution records, store, state machine and request service
//! - [`rbac`]: Roles, grants, permission resolution and visibility filtering
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use orchestra::execution::{ExecutionService, LocalRunner, NullPublisher};
//! use orchestra::rbac::RbacSnapshot;
//! use orchestra::workflow::PackLoader;
//! use orchestra::EngineConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let service = ExecutionService::new(
//!         config,
//!         Arc::new(PackLoader::new("packs")),
//!         RbacSnapshot::new(),
//!         Arc::new(NullPublisher),
//!     )?;
//!
//!     // Request as the system user; the parent execution is already running
//!     let (execution, workflow) = service.request("stanley", "wolfpack.sequential", Default::default())?;
//!     println!("{} is {}", execution.id, execution.status);
//!
//!     // Drive it to completion in-process
//!     if let Some(workflow) = workflow {
//!         LocalRunner::for_service(&service).run(&workflow)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod rbac;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use execution::{ActionExecution, ExecutionService, ExecutionStatus, WorkflowExecution};
pub use workflow::{compile, load_workflow, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Orchestra";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "Orchestra");
    }

    #[test]
    fn test_module_exports_definition() {
        let workflow = WorkflowDefinition::new("empty");
        assert!(workflow.is_empty());
        assert!(compile(&workflow).is_err());
    }

    #[test]
    fn test_module_exports_status() {
        assert!(ExecutionStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
