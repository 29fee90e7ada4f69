//! Role-Based Access Control
//!
//! - [`types`]: roles, grants, permissions and resource references
//! - [`snapshot`]: immutable role/assignment tables and their loader
//! - [`resolver`]: permission checks against a snapshot
//! - [`visibility`]: per-user narrowing of execution listings

pub mod resolver;
pub mod snapshot;
pub mod types;
pub mod visibility;

pub use resolver::{AccessResolver, Decision};
pub use snapshot::{RbacSnapshot, ADMIN_ROLE, OBSERVER_ROLE, SYSTEM_ADMIN_ROLE};
pub use types::{
    GrantScope, PermissionGrant, PermissionType, ResourceRef, ResourceType, Role, RoleAssignment,
};
pub use visibility::{scope_query, ExecutionQuery, ScopedQuery};
