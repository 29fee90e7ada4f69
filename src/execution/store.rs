//! Record Store
//!
//! Revisioned persistence for execution records. Every record carries a
//! monotonically increasing revision; writes go through compare-and-swap
//! against the revision the writer read, so concurrent writers never
//! silently overwrite each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use log::{debug, warn};

use crate::error::{EngineError, EngineResult};

use super::record::{ActionExecution, WorkflowExecution};
use super::status::ExecutionStatus;

/// A record the store can version.
pub trait Revisioned: Clone + PartialEq + Send + Sync {
    fn id(&self) -> &str;
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);

    /// User the record belongs to
    fn owner(&self) -> &str;

    fn status(&self) -> ExecutionStatus;

    /// Id of the record this one hangs off, if any
    fn parent_id(&self) -> Option<&str> {
        None
    }
}

impl Revisioned for ActionExecution {
    fn id(&self) -> &str {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn owner(&self) -> &str {
        &self.context.user
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }
}

impl Revisioned for WorkflowExecution {
    fn id(&self) -> &str {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn owner(&self) -> &str {
        &self.context.user
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.action_execution)
    }
}

/// Field filters applied by [`RecordStore::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub user: Option<String>,
    pub parent: Option<String>,
    pub status: Option<ExecutionStatus>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches<T: Revisioned>(&self, record: &T) -> bool {
        self.user.as_deref().map_or(true, |u| record.owner() == u)
            && self
                .parent
                .as_deref()
                .map_or(true, |p| record.parent_id() == Some(p))
            && self.status.map_or(true, |s| record.status() == s)
    }
}

/// Maximum number of records a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(usize),
    Unbounded,
}

impl Limit {
    fn take(&self) -> usize {
        match self {
            Self::Bounded(n) => *n,
            Self::Unbounded => usize::MAX,
        }
    }
}

/// Result ordering by insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    MostRecentFirst,
    OldestFirst,
}

/// Revisioned storage for one record type.
pub trait RecordStore<T: Revisioned>: Send + Sync {
    /// Persists a new record at revision 1.
    fn insert(&self, record: T) -> EngineResult<T>;

    fn get(&self, id: &str) -> EngineResult<Option<T>>;

    /// Replaces the stored record if its revision still equals `expected`.
    ///
    /// On success the record is stored at `expected + 1` and returned.
    fn compare_and_swap(&self, record: T, expected: u64) -> EngineResult<T>;

    fn query(&self, filter: &QueryFilter, limit: Limit, order: SortOrder) -> EngineResult<Vec<T>>;

    /// Deletes a record, returning it if it existed.
    ///
    /// Only used to roll back a multi-record write that failed half way.
    fn remove(&self, id: &str) -> EngineResult<Option<T>>;
}

/// In-process record store.
pub struct MemoryStore<T> {
    records: RwLock<HashMap<String, (u64, T)>>,
    sequence: AtomicU64,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E>(_: E) -> EngineError {
    EngineError::Store("record store lock poisoned".to_string())
}

impl<T: Revisioned> RecordStore<T> for MemoryStore<T> {
    fn insert(&self, mut record: T) -> EngineResult<T> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(record.id()) {
            return Err(EngineError::Store(format!(
                "record '{}' already exists",
                record.id()
            )));
        }

        record.set_revision(1);
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        records.insert(record.id().to_string(), (seq, record.clone()));
        Ok(record)
    }

    fn get(&self, id: &str) -> EngineResult<Option<T>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).map(|(_, record)| record.clone()))
    }

    fn compare_and_swap(&self, mut record: T, expected: u64) -> EngineResult<T> {
        let mut records = self.records.write().map_err(poisoned)?;
        let (_, current) = records
            .get_mut(record.id())
            .ok_or_else(|| EngineError::NotFound(format!("record '{}'", record.id())))?;

        if current.revision() != expected {
            return Err(EngineError::ConcurrentModification {
                id: record.id().to_string(),
                expected,
                actual: current.revision(),
            });
        }

        record.set_revision(expected + 1);
        *current = record.clone();
        Ok(record)
    }

    fn query(&self, filter: &QueryFilter, limit: Limit, order: SortOrder) -> EngineResult<Vec<T>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut matched: Vec<&(u64, T)> = records
            .values()
            .filter(|(_, record)| filter.matches(record))
            .collect();

        matched.sort_by_key(|(seq, _)| *seq);
        if order == SortOrder::MostRecentFirst {
            matched.reverse();
        }

        Ok(matched
            .into_iter()
            .take(limit.take())
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn remove(&self, id: &str) -> EngineResult<Option<T>> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(id).map(|(_, record)| record))
    }
}

/// Re-reads, mutates and writes a record until the write lands.
///
/// Only [`EngineError::ConcurrentModification`] is retried; any error from
/// `mutate` aborts immediately. A mutation that leaves the record unchanged
/// writes nothing and returns the record at its current revision. After `max_attempts` lost races the caller
/// gets [`EngineError::TransientWriteFailure`].
pub fn update_with_retry<T, S, F>(
    store: &S,
    id: &str,
    max_attempts: u32,
    mut mutate: F,
) -> EngineResult<T>
where
    T: Revisioned,
    S: RecordStore<T> + ?Sized,
    F: FnMut(&mut T) -> EngineResult<()>,
{
    for attempt in 1..=max_attempts {
        let current = store
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(format!("record '{}'", id)))?;
        let expected = current.revision();

        let mut updated = current.clone();
        mutate(&mut updated)?;
        if updated == current {
            return Ok(current);
        }

        match store.compare_and_swap(updated, expected) {
            Ok(written) => return Ok(written),
            Err(e) if e.is_retryable() => {
                debug!("Write to '{}' lost race (attempt {}/{}): {}", id, attempt, max_attempts, e);
            }
            Err(e) => return Err(e),
        }
    }

    warn!("Giving up on '{}' after {} attempts", id, max_attempts);
    Err(EngineError::TransientWriteFailure {
        id: id.to_string(),
        attempts: max_attempts,
    })
}
