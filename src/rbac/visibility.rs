//! Visibility Filter
//!
//! Narrows execution queries to what the caller may see. Filtering happens
//! on the query itself, so hidden records are never fetched and never
//! counted against the caller's page.

use log::debug;

use crate::execution::store::{Limit, QueryFilter, SortOrder};

/// A listing request as the caller asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionQuery {
    pub filter: QueryFilter,
    pub limit: Limit,
    pub order: SortOrder,
}

impl ExecutionQuery {
    pub fn new(limit: Limit) -> Self {
        Self {
            filter: QueryFilter::default(),
            limit,
            order: SortOrder::default(),
        }
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// The query the store will actually run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedQuery {
    /// Run as requested
    Unrestricted(ExecutionQuery),
    /// Run restricted to the caller's own executions
    Owned(ExecutionQuery),
    /// Asked only for records the caller cannot see
    Empty,
}

impl ScopedQuery {
    pub fn query(&self) -> Option<&ExecutionQuery> {
        match self {
            Self::Unrestricted(q) | Self::Owned(q) => Some(q),
            Self::Empty => None,
        }
    }
}

/// Scopes a listing query for `user`.
///
/// `privileged` is the outcome of the unscoped list-all check. Without it,
/// and with isolation on, the query is narrowed to `context.user == user`;
/// ordering and limit are kept as requested.
pub fn scope_query(user: &str, base: ExecutionQuery, privileged: bool, permission_isolation: bool) -> ScopedQuery {
    if privileged || !permission_isolation {
        return ScopedQuery::Unrestricted(base);
    }

    match base.filter.user.as_deref() {
        Some(requested) if requested != user => {
            debug!("Isolation: '{}' asked for executions of '{}'", user, requested);
            ScopedQuery::Empty
        }
        _ => {
            let mut narrowed = base;
            narrowed.filter.user = Some(user.to_string());
            ScopedQuery::Owned(narrowed)
        }
    }
}

/// Returns true if `user` may see a record owned by `owner`.
pub fn can_see(user: &str, owner: &str, privileged: bool, permission_isolation: bool) -> bool {
    privileged || !permission_isolation || user == owner
}
