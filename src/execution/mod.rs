//! Workflow Execution Module
//!
//! Everything that exists once an action has been requested: the persisted
//! records, their revisioned store, the status state machine, task
//! bookkeeping, event emission, and the request service in front of it all.
//!
//! # Architecture
//!
//! - [`record`]: Action execution and workflow execution records
//! - [`status`]: Execution statuses and legal transitions
//! - [`store`]: Revisioned record store with compare-and-swap
//! - [`events`]: Events emitted on create and on every transition
//! - [`tracker`]: Task start/complete bookkeeping on the flow
//! - [`machine`]: Status transitions with parent mirroring
//! - [`service`]: Request, read, list and cancel entry points
//! - [`runner`]: In-process scheduler for simulated runs

pub mod events;
pub mod machine;
pub mod record;
pub mod runner;
pub mod service;
pub mod status;
pub mod store;
pub mod tracker;

pub use events::{ChannelPublisher, EventKind, EventPublisher, ExecutionEvent, NullPublisher, RecordKind};
pub use machine::StateMachine;
pub use record::{ActionExecution, ExecutionContext, RbacContext, WorkflowExecution};
pub use runner::LocalRunner;
pub use service::{ExecutionService, ListRequest};
pub use status::ExecutionStatus;
pub use store::{update_with_retry, Limit, MemoryStore, QueryFilter, RecordStore, Revisioned, SortOrder};
pub use tracker::FlowTracker;
