//! Execution Events
//!
//! The core emits an immutable [`ExecutionEvent`] for every record it
//! creates and every status transition it commits. Delivery is the
//! publisher's concern; the core never waits on it.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::status::ExecutionStatus;
use super::store::Revisioned;

/// What happened to the record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    StateChange,
}

/// Which record the event is about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ActionExecution,
    WorkflowExecution,
}

/// A committed change, published after the write lands.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub record: RecordKind,
    pub execution_id: String,
    pub revision: u64,
    pub status: ExecutionStatus,
    pub at: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new<T: Revisioned>(kind: EventKind, record: RecordKind, value: &T) -> Self {
        Self {
            kind,
            record,
            execution_id: value.id().to_string(),
            revision: value.revision(),
            status: value.status(),
            at: Utc::now(),
        }
    }

    /// Key consumers use to drop redelivered events.
    pub fn dedup_key(&self) -> (String, u64) {
        (self.execution_id.clone(), self.revision)
    }
}

/// Outbound side of the event transport.
pub trait EventPublisher: Send + Sync {
    /// Hands the event to the transport. Must not block on delivery.
    fn publish(&self, event: ExecutionEvent);
}

impl<'a> dyn EventPublisher + 'a {
    pub fn publish_create<T: Revisioned>(&self, record: RecordKind, value: &T) {
        self.publish(ExecutionEvent::new(EventKind::Create, record, value));
    }

    pub fn publish_state_change<T: Revisioned>(&self, record: RecordKind, value: &T) {
        self.publish(ExecutionEvent::new(EventKind::StateChange, record, value));
    }
}

/// Publishes events onto a std channel.
pub struct ChannelPublisher {
    sender: Mutex<Sender<ExecutionEvent>>,
}

impl ChannelPublisher {
    /// Creates the publisher together with the receiving end.
    pub fn new() -> (Self, Receiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: ExecutionEvent) {
        debug!(
            "Publishing {:?} for {} rev {} ({})",
            event.kind, event.execution_id, event.revision, event.status
        );

        let sent = match self.sender.lock() {
            Ok(sender) => sender.send(event).is_ok(),
            Err(_) => false,
        };
        if !sent {
            warn!("Event channel closed; dropping event");
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: ExecutionEvent) {}
}
