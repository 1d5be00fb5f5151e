use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::CallOutcome;

/// Identifier of a queue entry, stable across retries
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(format!("call-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lead priority. Declaration order is dequeue order.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Partition a queue entry currently belongs to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Calling,
    Completed,
    Failed,
}

/// Lead record as supplied by an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub phone: String,
    pub priority: Priority,
}

impl Lead {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            priority,
        }
    }
}

/// One lead tracked by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCall {
    pub id: CallId,
    pub lead_name: String,
    pub phone_number: String,
    pub priority: Priority,
    pub status: CallStatus,
    /// Failed dial attempts so far
    pub attempts: u32,
    /// Earliest instant the entry may be dialed
    pub scheduled_time: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// Insertion order, the final tie-breaker
    pub seq: u64,
    pub last_outcome: Option<CallOutcome>,
}

impl QueuedCall {
    pub fn new(lead: Lead, now: DateTime<Utc>, seq: u64) -> Self {
        Self {
            id: CallId::new(),
            lead_name: lead.name,
            phone_number: lead.phone,
            priority: lead.priority,
            status: CallStatus::Pending,
            attempts: 0,
            scheduled_time: now,
            enqueued_at: now,
            seq,
            last_outcome: None,
        }
    }
}

/// What `report_outcome` did with an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueTransition {
    Completed,
    RetryScheduled { attempts: u32, at: DateTime<Utc> },
    Exhausted { attempts: u32 },
}

/// Dashboard view of the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Pending entries in dequeue order
    pub pending: Vec<QueuedCall>,
    pub calling: Vec<QueuedCall>,
    pub completed: Vec<QueuedCall>,
    pub failed: Vec<QueuedCall>,
}

impl QueueSnapshot {
    pub fn total(&self) -> usize {
        self.pending.len() + self.calling.len() + self.completed.len() + self.failed.len()
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.pending.len(),
            self.calling.len(),
            self.completed.len(),
            self.failed.len(),
        )
    }
}
