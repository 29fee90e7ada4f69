//! Workflow Definition Module
//!
//! Provides the definition data model, the loader interface, and the pure
//! transformations applied before an execution exists.
//!
//! # Structure
//!
//! - [`model`]: Action and workflow definitions
//! - [`parser`]: Definition loaders (packs directory, in-memory)
//! - [`validator`]: Structural checks on definitions
//! - [`graph`]: Graph compiler producing the execution graph
//! - [`schema`]: Input validation against declared parameters
//! - [`flow`]: Task flow recorded while an execution runs

pub mod flow;
pub mod graph;
pub mod model;
pub mod parser;
pub mod schema;
pub mod validator;

pub use flow::{TaskFlow, TaskRecord, TaskResult, TaskStatus};
pub use graph::{compile, ExecutionGraph, GraphNode};
pub use model::{
    ActionDefinition, Edge, InputSchema, ParameterSpec, ParameterType, TaskDefinition,
    WorkflowDefinition,
};
pub use parser::{load_workflow, DefinitionLoader, PackLoader, StaticLoader};
pub use schema::{validate_input, InputValidationReport};
pub use validator::DefinitionError;
